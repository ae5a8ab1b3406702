use crate::context::IoContext;
use crate::poller::Poller;
use crate::sys::RawSocket;
use std::io;
use std::rc::Rc;

/// What a callback is told about the operation it was waiting for.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event {
    /// A read, write or connect completed with the given number of bytes
    /// transferred.
    Complete(usize),
    /// An accept completed and produced a fully usable socket.
    Accepted(RawSocket),
    /// The operation failed with the given OS error.
    Failed(io::Error),
    /// The poller is shutting down while the socket is still registered.
    Terminating,
}

impl Event {
    /// Test if this is the shutdown notice.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Event::Terminating)
    }

    pub(crate) fn from_result(result: io::Result<usize>) -> Self {
        match result {
            Ok(n) => Event::Complete(n),
            Err(e) => Event::Failed(e),
        }
    }
}

/// A completion or notification callback attached to an io-context.
///
/// Callbacks run inline on the thread draining the poller and must not block.
/// They receive the poller so they can issue, submit or retire operations
/// re-entrantly.
pub type Callback<C> = Rc<dyn Fn(&Poller<C>, Event, &IoContext<C>)>;
