//! An in-process completion channel.
//!
//! [LoopbackPort] stands in for the kernel: a submission is recorded with
//! [LoopbackPort::start], and completed later, possibly from another thread,
//! through [LoopbackPort::complete] or [LoopbackPort::fail]. The status is
//! written into the descriptor of the operation the same way the OS would,
//! after which the completion is queued for the poller to drain.
//!
//! Every start hands out a single [Pending] token carrying a ticket. A
//! completion is only queued if its ticket is still the one registered for
//! the descriptor, so a token whose submission failed and was handed back to
//! the poller can't complete anything.

use crate::channel::{Channel, Entry};
use crate::errors;
use crate::flags::OpKind;
use crate::operation::Submission;
use crate::sys::RawSocket;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The descriptor the loopback port writes completion status into.
#[derive(Debug, Default)]
pub struct Overlapped {
    /// Zero on success, a raw OS error code otherwise.
    status: AtomicI32,
    transferred: AtomicU32,
}

struct Packet {
    overlapped: *mut Overlapped,
    bytes_transferred: u32,
}

// Safety: the descriptor is only written to before the packet is queued, and
// only read once the poller has dequeued it.
unsafe impl Send for Packet {}

#[derive(Default)]
struct State {
    queue: VecDeque<Packet>,
    associated: HashSet<RawSocket>,
    failing: HashSet<RawSocket>,
    closed: Vec<RawSocket>,
    /// Started descriptors by address, with the ticket of their submission.
    started: HashMap<usize, u64>,
    next_ticket: u64,
    fail_wait: Option<i32>,
}

struct Inner {
    state: Mutex<State>,
    ready: Condvar,
}

/// An in-process completion channel.
#[derive(Clone)]
pub struct LoopbackPort {
    inner: Arc<Inner>,
}

impl LoopbackPort {
    /// Construct a new loopback port.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                ready: Condvar::new(),
            }),
        }
    }

    /// Record the submission of an operation, taking the place of the native
    /// overlapped call.
    ///
    /// The submission is consumed, so each submission yields at most one
    /// token.
    pub fn start(&self, submission: Submission<'_, Overlapped>) -> Pending {
        let mut state = self.inner.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state
            .started
            .insert(submission.overlapped() as usize, ticket);

        Pending {
            socket: submission.socket(),
            kind: submission.kind(),
            overlapped: submission.overlapped(),
            ticket,
        }
    }

    /// Complete the given operation successfully, having transferred the
    /// given number of bytes.
    ///
    /// Returns `false` without queueing anything if the submission of the
    /// operation was handed back to the poller.
    pub fn complete(&self, pending: Pending, transferred: usize) -> bool {
        let transferred = transferred.min(u32::MAX as usize) as u32;
        self.post(pending, 0, transferred)
    }

    /// Fail the given operation with a raw OS error code.
    ///
    /// Returns `false` under the same conditions as
    /// [complete][LoopbackPort::complete].
    pub fn fail(&self, pending: Pending, code: i32) -> bool {
        self.post(pending, code, 0)
    }

    fn post(&self, pending: Pending, status: i32, transferred: u32) -> bool {
        let mut state = self.inner.state.lock();
        let key = pending.overlapped as usize;

        if state.started.get(&key) != Some(&pending.ticket) {
            return false;
        }

        state.started.remove(&key);

        // Safety: the descriptor was still registered under this ticket, so
        // the reference held on behalf of the operation keeps it alive until
        // the completion queued below has been drained.
        unsafe {
            let overlapped = &*pending.overlapped;
            overlapped.status.store(status, Ordering::Release);
            overlapped.transferred.store(transferred, Ordering::Release);
        }

        state.queue.push_back(Packet {
            overlapped: pending.overlapped,
            bytes_transferred: transferred,
        });

        drop(state);
        self.inner.ready.notify_one();
        true
    }

    /// Make the next wait on the port fail with the given raw OS error code,
    /// including a wait which is already blocked.
    pub fn fail_next_wait(&self, code: i32) {
        self.inner.state.lock().fail_wait = Some(code);
        self.inner.ready.notify_all();
    }

    /// Make the post-accept and post-connect fixups of the given socket fail.
    pub fn fail_fixups(&self, socket: RawSocket) {
        self.inner.state.lock().failing.insert(socket);
    }

    /// Test if the given socket is associated with the port.
    pub fn is_associated(&self, socket: RawSocket) -> bool {
        self.inner.state.lock().associated.contains(&socket)
    }

    /// The sockets closed by the poller, in the order they were closed.
    pub fn closed(&self) -> Vec<RawSocket> {
        self.inner.state.lock().closed.clone()
    }

    /// The number of started operations which have not been completed.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().started.len()
    }

    /// The number of queued completions and wake packets.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }
}

impl Default for LoopbackPort {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopbackPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();

        f.debug_struct("LoopbackPort")
            .field("queued", &state.queue.len())
            .field("outstanding", &state.started.len())
            .finish()
    }
}

unsafe impl Channel for LoopbackPort {
    type Overlapped = Overlapped;

    fn associate(&self, socket: RawSocket) -> io::Result<()> {
        if !self.inner.state.lock().associated.insert(socket) {
            return Err(errors::already_associated());
        }

        Ok(())
    }

    fn wait(
        &self,
        entries: &mut Vec<Entry<Self::Overlapped>>,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let mut state = self.inner.state.lock();
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        loop {
            if let Some(code) = state.fail_wait.take() {
                return Err(io::Error::from_raw_os_error(code));
            }

            if !state.queue.is_empty() {
                break;
            }

            match (timeout, deadline) {
                (Some(_), Some(deadline)) => {
                    if self.inner.ready.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                _ => self.inner.ready.wait(&mut state),
            }
        }

        let n = usize::min(capacity.max(1), state.queue.len());

        for packet in state.queue.drain(..n) {
            entries.push(Entry {
                overlapped: packet.overlapped,
                bytes_transferred: packet.bytes_transferred,
            });
        }

        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        self.inner.state.lock().queue.push_back(Packet {
            overlapped: ptr::null_mut(),
            bytes_transferred: 0,
        });

        self.inner.ready.notify_one();
        Ok(())
    }

    unsafe fn result(
        &self,
        _: RawSocket,
        overlapped: *mut Self::Overlapped,
        _: u32,
    ) -> io::Result<usize> {
        let overlapped = &*overlapped;

        match overlapped.status.load(Ordering::Acquire) {
            0 => Ok(overlapped.transferred.load(Ordering::Acquire) as usize),
            code => Err(io::Error::from_raw_os_error(code)),
        }
    }

    fn update_accept_context(&self, listener: RawSocket, accepted: RawSocket) -> io::Result<()> {
        let state = self.inner.state.lock();

        if state.failing.contains(&listener) || state.failing.contains(&accepted) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "failed to update accept context",
            ));
        }

        Ok(())
    }

    fn update_connect_context(&self, socket: RawSocket) -> io::Result<()> {
        if self.inner.state.lock().failing.contains(&socket) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "failed to update connect context",
            ));
        }

        Ok(())
    }

    fn close(&self, socket: RawSocket) {
        let mut state = self.inner.state.lock();
        state.associated.remove(&socket);
        state.closed.push(socket);
    }

    fn abandon(&self, overlapped: *mut Self::Overlapped) {
        self.inner.state.lock().started.remove(&(overlapped as usize));
    }
}

/// An operation started on a [LoopbackPort] which has not been completed.
///
/// Dropping it without completing it leaves the operation outstanding
/// forever, just like an overlapped call the kernel never finishes.
#[must_use = "the operation stays outstanding until completed"]
pub struct Pending {
    socket: RawSocket,
    kind: OpKind,
    overlapped: *mut Overlapped,
    ticket: u64,
}

// Safety: the descriptor pointer is only dereferenced to write the completion
// status, under the port lock and only while its ticket is registered.
unsafe impl Send for Pending {}

impl Pending {
    /// The socket the operation was started over.
    pub fn socket(&self) -> RawSocket {
        self.socket
    }

    /// The kind of the operation.
    pub fn kind(&self) -> OpKind {
        self.kind
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("socket", &self.socket)
            .field("kind", &self.kind)
            .finish()
    }
}
