use crate::channel::{Channel, Waker};
use crate::context::IoContext;
use crate::flags::{Direction, Interest};
use crate::poller::Poller;
use crate::sys::RawSocket;
use std::io;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// The polling interface an event loop is written against.
///
/// Completion-based pollers such as [Poller] and readiness-based pollers both
/// implement it. Operations which only make sense for one kind of poller are
/// no-ops for the other.
pub trait Multiplexer {
    /// The per-socket context handed out by
    /// [begin_watching][Multiplexer::begin_watching].
    type Context;

    /// Start watching a socket.
    fn begin_watching(&self, socket: RawSocket) -> io::Result<Self::Context>;

    /// Stop watching the socket of a context.
    fn end_watching(&self, context: &Self::Context);

    /// Mark a direction as interested in its next result.
    fn issue(&self, direction: Direction, context: &Self::Context);

    /// Mark a direction as no longer interested in results.
    fn retire(&self, direction: Direction, context: &Self::Context);

    /// Start watching readiness. Completion-based pollers ignore this.
    fn watch(&self, interest: Interest, context: &Self::Context) -> io::Result<()> {
        let _ = (interest, context);
        Ok(())
    }

    /// Stop watching readiness. Completion-based pollers ignore this.
    fn unwatch(&self, interest: Interest, context: &Self::Context) -> io::Result<()> {
        let _ = (interest, context);
        Ok(())
    }

    /// Wait for events for up to `timeout` and dispatch them, returning the
    /// number of callbacks invoked.
    fn drain(&self, timeout: Option<Duration>, stop: &AtomicBool) -> io::Result<usize>;

    /// Tell every watched socket that the loop is terminating.
    fn broadcast_terminating(&self);

    /// The number of operations which still have to be drained before the
    /// poller can be dropped without leaking.
    fn pending(&self) -> usize {
        0
    }

    /// Construct a handle which interrupts [drain][Multiplexer::drain] from
    /// any thread.
    fn waker(&self) -> Waker;
}

impl<C> Multiplexer for Poller<C>
where
    C: Channel,
{
    type Context = IoContext<C>;

    #[inline]
    fn begin_watching(&self, socket: RawSocket) -> io::Result<Self::Context> {
        Poller::begin_watching(self, socket)
    }

    #[inline]
    fn end_watching(&self, context: &Self::Context) {
        Poller::end_watching(self, context)
    }

    #[inline]
    fn issue(&self, direction: Direction, context: &Self::Context) {
        Poller::issue(self, direction, context)
    }

    #[inline]
    fn retire(&self, direction: Direction, context: &Self::Context) {
        Poller::retire(self, direction, context)
    }

    #[inline]
    fn drain(&self, timeout: Option<Duration>, stop: &AtomicBool) -> io::Result<usize> {
        Poller::drain(self, timeout, stop)
    }

    #[inline]
    fn broadcast_terminating(&self) {
        Poller::broadcast_terminating(self)
    }

    #[inline]
    fn pending(&self) -> usize {
        Poller::pending(self)
    }

    #[inline]
    fn waker(&self) -> Waker {
        Poller::waker(self)
    }
}
