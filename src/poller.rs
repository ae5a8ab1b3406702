use crate::channel::{Channel, Entry, Waker};
use crate::context::{IoContext, IoInner};
use crate::errors;
use crate::event::Event;
use crate::flags::{Direction, OpFlags, OpKind};
use crate::operation::{OpContext, Submission};
use crate::options::Options;
use crate::stats::{Counters, Stats};
use crate::sys::RawSocket;
use slab::Slab;
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::mem;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A completion-based I/O multiplexer.
///
/// The poller owns one completion [Channel] and every io-context watched
/// through it. It is driven by exactly one thread: every method must be
/// called from the thread that drains it, which is why it's neither `Send`
/// nor `Sync`. Use a [Waker] to interrupt a drain from elsewhere.
pub struct Poller<C>
where
    C: Channel,
{
    channel: C,
    registry: RefCell<Slab<Rc<IoInner<C>>>>,
    counters: Rc<Counters>,
    entries: RefCell<Vec<Entry<C::Overlapped>>>,
    options: Options,
}

impl<C> Poller<C>
where
    C: Channel,
{
    /// Construct a poller over the given channel with default options.
    pub fn new(channel: C) -> Self {
        Self::with_options(channel, Options::default())
    }

    /// Construct a poller over the given channel.
    pub fn with_options(channel: C, options: Options) -> Self {
        Self {
            channel,
            registry: RefCell::new(Slab::new()),
            counters: Rc::new(Counters::default()),
            entries: RefCell::new(Vec::with_capacity(options.batch)),
            options,
        }
    }

    /// The channel driven by this poller.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The options this poller was constructed with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Construct a waker which can interrupt [drain][Poller::drain] from any
    /// thread.
    pub fn waker(&self) -> Waker {
        Waker::new(self.channel.clone())
    }

    /// A snapshot of the allocation and dispatch counters.
    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// The number of submitted operations whose completion has not been
    /// drained yet, including those of retired io-contexts.
    pub fn pending(&self) -> usize {
        self.counters.pending.get()
    }

    /// The number of watched sockets.
    pub fn len(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Test if no sockets are watched.
    pub fn is_empty(&self) -> bool {
        self.registry.borrow().is_empty()
    }

    /// Start watching the given socket.
    ///
    /// The socket is associated with the completion channel, after which an
    /// io-context is allocated for it. If the association fails nothing is
    /// allocated.
    pub fn begin_watching(&self, socket: RawSocket) -> io::Result<IoContext<C>> {
        if let Err(e) = self.channel.associate(socket) {
            debug!(socket = socket, error = %e, "failed to associate socket");
            return Err(e);
        }

        let mut registry = self.registry.borrow_mut();
        let entry = registry.vacant_entry();
        let inner = IoInner::allocate(socket, entry.key(), &self.channel, &self.counters);
        entry.insert(inner.clone());

        trace!(socket = socket, "begin watching");
        Ok(IoContext::new(inner))
    }

    /// Stop watching the socket of the given io-context.
    ///
    /// Attached callbacks are detached and both directions are retired.
    /// Outstanding operations are not cancelled: their completions are
    /// swallowed by the drain loop, which releases the op-context once the OS
    /// is done with it. Calling this more than once is a no-op.
    pub fn end_watching(&self, context: &IoContext<C>) {
        let key = context.inner.key;

        let removed = {
            let mut registry = self.registry.borrow_mut();

            let watched = matches!(
                registry.get(key),
                Some(current) if Rc::ptr_eq(current, &context.inner)
            );

            if watched {
                Some(registry.remove(key))
            } else {
                None
            }
        };

        let removed = match removed {
            Some(removed) => removed,
            None => {
                trace!(socket = context.socket(), "io context already retired");
                return;
            }
        };

        trace!(socket = context.socket(), "end watching");
        removed.retire();
    }

    /// Mark the given direction as interested in its next completion.
    ///
    /// This is expected right before an operation is submitted over the
    /// direction.
    pub fn issue(&self, direction: Direction, context: &IoContext<C>) {
        match context.slot(direction) {
            Some(op) => op.remove(OpFlags::DONE),
            None => trace!(socket = context.socket(), "issue on retired io context"),
        }
    }

    /// Mark the given direction as no longer interested in completions.
    ///
    /// An operation already handed to the OS is left to complete, but its
    /// completion will not reach the callback.
    pub fn retire(&self, direction: Direction, context: &IoContext<C>) {
        if let Some(op) = context.slot(direction) {
            op.insert(OpFlags::DONE);
        }
    }

    /// Submit an overlapped operation over the given direction.
    ///
    /// `start` performs the native call with the descriptor and scratch state
    /// of the direction. Once it returns successfully, or with an error that
    /// the channel considers to mean "queued", the op-context belongs to the
    /// OS until its completion is drained. Any other error hands it back and
    /// is returned as-is.
    ///
    /// Fails without calling `start` if the context is retired or if an
    /// operation is already outstanding in this direction.
    pub fn submit<F>(
        &self,
        direction: Direction,
        context: &IoContext<C>,
        kind: OpKind,
        start: F,
    ) -> io::Result<()>
    where
        F: FnOnce(Submission<'_, C::Overlapped>) -> io::Result<()>,
    {
        let op = context.slot(direction).ok_or_else(errors::retired)?;

        if op.contains(OpFlags::AWAITING) {
            return Err(errors::busy());
        }

        let mut scratch = op.scratch.try_borrow_mut().map_err(|_| errors::busy())?;

        // Safety: nothing is outstanding, as checked above.
        unsafe {
            op.reset();
        }

        op.kind.set(Some(kind));
        op.insert(OpFlags::AWAITING);
        let overlapped = OpContext::into_overlapped(op.clone());
        Counters::incr(&self.counters.pending);

        let result = start(Submission {
            socket: op.socket,
            kind,
            overlapped,
            scratch: &mut scratch,
        });

        drop(scratch);

        match result {
            Ok(()) => (),
            Err(e) if self.channel.is_pending(&e) => (),
            Err(e) => {
                self.channel.abandon(overlapped);

                // Safety: the OS never took ownership of the descriptor.
                unsafe {
                    drop(OpContext::<C>::from_overlapped(overlapped));
                }

                op.remove(OpFlags::AWAITING);
                op.kind.set(None);
                Counters::decr(&self.counters.pending);
                debug!(socket = op.socket, kind = ?kind, error = %e, "submission failed");
                return Err(e);
            }
        }

        trace!(socket = op.socket, kind = ?kind, "submitted");
        Ok(())
    }

    /// Wait for completions and dispatch each of them to its callback.
    ///
    /// Blocks for up to `timeout`, or until a completion or a wake arrives if
    /// `timeout` is `None`. If `stop` is already raised this doesn't block
    /// at all. Returns the number of callbacks invoked.
    ///
    /// Callbacks are called inline. An error means the channel can no longer
    /// be waited on and the poller must not be driven any further.
    pub fn drain(&self, timeout: Option<Duration>, stop: &AtomicBool) -> io::Result<usize> {
        let timeout = if stop.load(Ordering::Acquire) {
            Some(Duration::from_millis(0))
        } else {
            timeout
        };

        // Taken out so that callbacks can drain re-entrantly.
        let mut entries = mem::take(&mut *self.entries.borrow_mut());
        entries.clear();

        if let Err(e) = self
            .channel
            .wait(&mut entries, self.options.batch, timeout)
        {
            *self.entries.borrow_mut() = entries;
            return Err(e);
        }

        let mut dispatched = 0;

        for entry in entries.drain(..) {
            if entry.is_wake() {
                trace!("wake packet");
                continue;
            }

            // Safety: the channel only ever hands back descriptors submitted
            // through this poller, and each exactly once.
            let op = unsafe { OpContext::<C>::from_overlapped(entry.overlapped) };

            if self.complete(op, entry.bytes_transferred) {
                dispatched += 1;
            }
        }

        *self.entries.borrow_mut() = entries;
        Ok(dispatched)
    }

    /// Process a single dequeued completion, consuming the reference which
    /// was held on behalf of the OS.
    fn complete(&self, op: Rc<OpContext<C>>, bytes_transferred: u32) -> bool {
        op.remove(OpFlags::AWAITING);
        Counters::decr(&self.counters.pending);
        let kind = op.kind.take();

        // Safety: the completion of this descriptor has just been dequeued.
        let result = unsafe {
            self.channel
                .result(op.socket, op.as_overlapped(), bytes_transferred)
        };

        if op.contains(OpFlags::RETIRING) {
            trace!(socket = op.socket, kind = ?kind, "completion of retired op context");
            Counters::incr(&self.counters.discarded);
            return false;
        }

        let kind = match kind {
            Some(kind) => kind,
            None => {
                warn!(socket = op.socket, "completion without a submitted operation");
                return false;
            }
        };

        let done = op.contains(OpFlags::DONE);

        let event = match kind {
            OpKind::Read => {
                if done {
                    if let Ok(n) = result {
                        if n > 0 {
                            op.scratch.borrow_mut().stashed = Some(n);
                        }
                    }

                    return self.swallow(&op, kind);
                }

                Event::from_result(result)
            }
            OpKind::Write => {
                if done {
                    return self.swallow(&op, kind);
                }

                Event::from_result(result)
            }
            OpKind::Accept => {
                if done {
                    return self.swallow(&op, kind);
                }

                let accepted = op.scratch.borrow_mut().accepted.take();

                let accepted = match accepted {
                    Some(accepted) => accepted,
                    None => {
                        warn!(socket = op.socket, "accept completed without a socket");
                        return false;
                    }
                };

                let result = result
                    .and_then(|_| self.channel.update_accept_context(op.socket, accepted));

                match result {
                    Ok(()) => Event::Accepted(accepted),
                    Err(_e) => {
                        // The attempt is dropped without telling anyone, the
                        // accept loop of the owner is expected to submit again.
                        debug!(
                            socket = op.socket,
                            accepted = accepted,
                            error = %_e,
                            "dropping accepted socket"
                        );

                        Counters::incr(&self.counters.dropped_accepts);
                        self.channel.close(accepted);
                        return false;
                    }
                }
            }
            OpKind::Connect => {
                if done {
                    return self.swallow(&op, kind);
                }

                Event::from_result(result.and_then(|n| {
                    self.channel.update_connect_context(op.socket)?;
                    Ok(n)
                }))
            }
        };

        self.dispatch(&op, event)
    }

    fn swallow(&self, op: &OpContext<C>, _kind: OpKind) -> bool {
        trace!(socket = op.socket, kind = ?_kind, "swallowed completion of done op context");
        Counters::incr(&self.counters.discarded);
        false
    }

    fn dispatch(&self, op: &OpContext<C>, event: Event) -> bool {
        let owner = op.owner.upgrade();
        let callback = op.callback();

        let (owner, callback) = match (owner, callback) {
            (Some(owner), Some(callback)) => (owner, callback),
            _ => {
                warn!(socket = op.socket, event = ?event, "no callback to dispatch to");

                if let Event::Accepted(accepted) = event {
                    self.channel.close(accepted);
                }

                return false;
            }
        };

        callback(self, event, &IoContext::new(owner));
        true
    }

    /// Tell every watched socket that the poller is terminating.
    ///
    /// For each io-context, the read callback, the write callback and then
    /// the notification callback are invoked with [Event::Terminating]. Each
    /// is looked up right before it's invoked, so callbacks detached by an
    /// earlier callback are skipped.
    pub fn broadcast_terminating(&self) {
        let snapshot = self
            .registry
            .borrow()
            .iter()
            .map(|(_, inner)| inner.clone())
            .collect::<Vec<_>>();

        debug!(contexts = snapshot.len(), "broadcasting termination");

        for inner in snapshot {
            let context = IoContext::new(inner);

            for direction in Direction::ALL {
                if let Some(callback) = context.slot(direction).and_then(|op| op.callback()) {
                    callback(self, Event::Terminating, &context);
                }
            }

            if let Some(callback) = context.notify() {
                callback(self, Event::Terminating, &context);
            }
        }
    }
}

impl<C> Drop for Poller<C>
where
    C: Channel,
{
    fn drop(&mut self) {
        let _ = self.channel.wake();

        let mut registry = mem::take(self.registry.get_mut());

        if !registry.is_empty() {
            debug!(contexts = registry.len(), "retiring contexts still watched");
        }

        for inner in registry.drain() {
            inner.retire();
        }

        let _stats = self.counters.snapshot();

        if _stats.pending > 0 {
            warn!(
                pending = _stats.pending,
                "poller dropped with outstanding operations, their contexts are leaked"
            );
        }
    }
}

impl<C> fmt::Debug for Poller<C>
where
    C: Channel + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("channel", &self.channel)
            .field("watched", &self.registry.borrow().len())
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}
