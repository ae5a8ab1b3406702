use crate::sys::RawSocket;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// A single dequeued completion.
///
/// A null `overlapped` pointer designates a wake packet rather than a
/// completed operation.
#[derive(Debug)]
pub struct Entry<O> {
    /// The descriptor of the completed operation.
    pub overlapped: *mut O,
    /// The number of bytes the OS reports as transferred.
    pub bytes_transferred: u32,
}

impl<O> Entry<O> {
    /// Construct the wake packet entry.
    pub fn wake() -> Self {
        Self {
            overlapped: std::ptr::null_mut(),
            bytes_transferred: 0,
        }
    }

    /// Test if this entry is a wake packet.
    pub fn is_wake(&self) -> bool {
        self.overlapped.is_null()
    }
}

/// An OS facility which queues notifications of finished overlapped
/// operations.
///
/// Handles are expected to be cheap clones of one shared channel, so that a
/// [Waker] can be handed to other threads.
///
/// # Safety
///
/// Every non-wake [Entry] returned from [wait][Channel::wait] must carry a
/// descriptor pointer that was previously handed out through a submission on
/// the same channel, and each such pointer must be returned exactly once.
pub unsafe trait Channel: Clone + Send + Sync + 'static {
    /// The per-operation descriptor the OS writes its status into.
    ///
    /// It is embedded as the first field of every op-context, so the pointer
    /// the OS hands back leads straight to the op-context.
    type Overlapped: Default;

    /// Associate a socket with the channel, so that overlapped operations
    /// issued over it complete through this channel.
    fn associate(&self, socket: RawSocket) -> io::Result<()>;

    /// Block for up to `timeout`, or indefinitely if `timeout` is `None`,
    /// until completions are available, then append at most `capacity` of them
    /// to `entries`.
    ///
    /// Timing out is not an error, it simply appends nothing.
    fn wait(
        &self,
        entries: &mut Vec<Entry<Self::Overlapped>>,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> io::Result<()>;

    /// Post a wake packet, unblocking a thread in [wait][Channel::wait].
    fn wake(&self) -> io::Result<()>;

    /// Read the outcome of a completed operation out of its descriptor.
    ///
    /// # Safety
    ///
    /// The descriptor must belong to an operation whose completion has been
    /// dequeued.
    unsafe fn result(
        &self,
        socket: RawSocket,
        overlapped: *mut Self::Overlapped,
        bytes_transferred: u32,
    ) -> io::Result<usize>;

    /// Make a freshly accepted socket inherit the properties of its listener.
    fn update_accept_context(&self, listener: RawSocket, accepted: RawSocket) -> io::Result<()>;

    /// Make a freshly connected socket fully usable.
    fn update_connect_context(&self, socket: RawSocket) -> io::Result<()>;

    /// Close a socket that will never be handed to a callback.
    fn close(&self, socket: RawSocket);

    /// Test if the error returned by a submission only indicates that the
    /// operation has been queued.
    fn is_pending(&self, error: &io::Error) -> bool {
        let _ = error;
        false
    }

    /// Called when a submission failed, so the given descriptor will never
    /// be completed and must not be handed back by [wait][Channel::wait].
    fn abandon(&self, overlapped: *mut Self::Overlapped) {
        let _ = overlapped;
    }
}

trait Wake: Send + Sync {
    fn wake(&self) -> io::Result<()>;
}

impl<C> Wake for C
where
    C: Channel,
{
    fn wake(&self) -> io::Result<()> {
        Channel::wake(self)
    }
}

/// A handle which unblocks a poller draining its channel, usable from any
/// thread.
///
/// Wakes are at-least-once: several wakes may collapse into one and a wake
/// with no one waiting is consumed by the next drain.
#[derive(Clone)]
pub struct Waker {
    inner: Arc<dyn Wake>,
}

impl Waker {
    pub(crate) fn new<C>(channel: C) -> Self
    where
        C: Channel,
    {
        Self {
            inner: Arc::new(channel),
        }
    }

    /// Wake the poller.
    pub fn wake(&self) -> io::Result<()> {
        self.inner.wake()
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waker").finish_non_exhaustive()
    }
}
