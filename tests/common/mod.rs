#![allow(dead_code)]

use proactor::loopback::{LoopbackPort, Pending};
use proactor::{Direction, IoContext, OpKind, Poller};
use std::io;

pub type Context = IoContext<LoopbackPort>;

pub fn setup() -> (LoopbackPort, Poller<LoopbackPort>) {
    proactor_support::init_logging("proactor=trace");
    let port = LoopbackPort::new();
    let poller = Poller::new(port.clone());
    (port, poller)
}

/// Issue and submit an operation, returning the handle through which the
/// loopback port completes it.
pub fn start(
    poller: &Poller<LoopbackPort>,
    port: &LoopbackPort,
    context: &Context,
    direction: Direction,
    kind: OpKind,
) -> io::Result<Pending> {
    start_with(poller, port, context, direction, kind, |_| ())
}

/// Same as [start], but lets the caller prepare the scratch state first.
pub fn start_with<F>(
    poller: &Poller<LoopbackPort>,
    port: &LoopbackPort,
    context: &Context,
    direction: Direction,
    kind: OpKind,
    prepare: F,
) -> io::Result<Pending>
where
    F: FnOnce(&mut proactor::Scratch),
{
    let mut pending = None;

    poller.issue(direction, context);
    poller.submit(direction, context, kind, |mut submission| {
        prepare(submission.scratch());
        pending = Some(port.start(submission));
        Ok(())
    })?;

    Ok(pending.expect("operation was started"))
}
