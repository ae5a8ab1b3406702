use crate::channel::Channel;
use crate::event::{Callback, Event};
use crate::flags::{Direction, OpFlags, SlotState};
use crate::operation::{OpContext, Scratch};
use crate::poller::Poller;
use crate::stats::Counters;
use crate::sys::RawSocket;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// The two directions owned by a live io-context.
pub(crate) struct Slots<C>
where
    C: Channel,
{
    pub(crate) read: Rc<OpContext<C>>,
    pub(crate) write: Rc<OpContext<C>>,
}

impl<C> Slots<C>
where
    C: Channel,
{
    pub(crate) fn get(&self, direction: Direction) -> &Rc<OpContext<C>> {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }
}

/// The per-socket record.
pub(crate) struct IoInner<C>
where
    C: Channel,
{
    pub(crate) socket: RawSocket,
    /// Index in the registry of the poller.
    pub(crate) key: usize,
    /// `None` once the context has been retired.
    pub(crate) slots: RefCell<Option<Slots<C>>>,
    pub(crate) notify: RefCell<Option<Callback<C>>>,
    /// Slots let go of at retirement, observable until they are released.
    retired: RefCell<Option<[Weak<OpContext<C>>; 2]>>,
    counters: Rc<Counters>,
}

impl<C> IoInner<C>
where
    C: Channel,
{
    /// Allocate an io-context together with both of its op-contexts.
    pub(crate) fn allocate(
        socket: RawSocket,
        key: usize,
        channel: &C,
        counters: &Rc<Counters>,
    ) -> Rc<Self> {
        Counters::incr(&counters.io_allocated);

        Rc::new_cyclic(|owner| IoInner {
            socket,
            key,
            slots: RefCell::new(Some(Slots {
                read: Rc::new(OpContext::new(
                    socket,
                    Direction::Read,
                    owner.clone(),
                    channel.clone(),
                    counters.clone(),
                )),
                write: Rc::new(OpContext::new(
                    socket,
                    Direction::Write,
                    owner.clone(),
                    channel.clone(),
                    counters.clone(),
                )),
            })),
            notify: RefCell::new(None),
            retired: RefCell::new(None),
            counters: counters.clone(),
        })
    }

    pub(crate) fn slot(&self, direction: Direction) -> Option<Rc<OpContext<C>>> {
        let slots = self.slots.borrow();
        Some(slots.as_ref()?.get(direction).clone())
    }

    /// A slot let go of at retirement which is still awaiting its completion.
    pub(crate) fn zombie(&self, direction: Direction) -> Option<Rc<OpContext<C>>> {
        let retired = self.retired.borrow();
        let [read, write] = retired.as_ref()?;

        match direction {
            Direction::Read => read.upgrade(),
            Direction::Write => write.upgrade(),
        }
    }

    /// Tear down the io-context.
    ///
    /// Both slots are marked as retiring and done, and the io-context lets go
    /// of them. A slot with no outstanding operation is released right away,
    /// one still awaiting its completion is kept alive by the reference held
    /// on behalf of the OS and released once the poller drains it.
    pub(crate) fn retire(&self) {
        let notify = self.notify.borrow_mut().take();

        let slots = match self.slots.borrow_mut().take() {
            Some(slots) => slots,
            None => return,
        };

        let mut detached = notify.is_some() as usize;
        let mut callbacks = Vec::with_capacity(2);

        for op in [&slots.read, &slots.write] {
            op.insert(OpFlags::RETIRING | OpFlags::DONE);

            if let Some(callback) = op.callback.borrow_mut().take() {
                detached += 1;
                callbacks.push(callback);
            }

            if op.contains(OpFlags::AWAITING) {
                trace!(
                    socket = self.socket,
                    direction = ?op.direction,
                    "op context awaits its completion before release"
                );
            }
        }

        *self.retired.borrow_mut() = Some([
            Rc::downgrade(&slots.read),
            Rc::downgrade(&slots.write),
        ]);

        if detached > 0 {
            debug!(
                socket = self.socket,
                detached = detached,
                "callbacks still attached at retirement"
            );
        }

        // Callbacks can own arbitrary state, drop them once nothing is
        // borrowed.
        drop(notify);
        drop(callbacks);
        drop(slots);
    }
}

impl<C> Drop for IoInner<C>
where
    C: Channel,
{
    fn drop(&mut self) {
        // Contexts dropped without being retired still release their slots.
        if let Some(slots) = self.slots.get_mut().take() {
            for op in [&slots.read, &slots.write] {
                op.insert(OpFlags::RETIRING | OpFlags::DONE);
                op.callback.borrow_mut().take();
            }
        }

        Counters::incr(&self.counters.io_released);
    }
}

/// A handle to the io-context of a socket watched by a [Poller].
///
/// Handles are cheap to clone. They stay valid after
/// [end_watching][Poller::end_watching], at which point every operation on
/// them becomes a no-op.
pub struct IoContext<C>
where
    C: Channel,
{
    pub(crate) inner: Rc<IoInner<C>>,
}

impl<C> IoContext<C>
where
    C: Channel,
{
    pub(crate) fn new(inner: Rc<IoInner<C>>) -> Self {
        Self { inner }
    }

    pub(crate) fn slot(&self, direction: Direction) -> Option<Rc<OpContext<C>>> {
        self.inner.slot(direction)
    }

    /// The socket this context was created for.
    pub fn socket(&self) -> RawSocket {
        self.inner.socket
    }

    /// Test if the context has been retired through
    /// [end_watching][Poller::end_watching].
    pub fn is_retired(&self) -> bool {
        self.inner.slots.borrow().is_none()
    }

    /// Attach the callback which receives the completions of the given
    /// direction, replacing any previous one.
    pub fn set_callback<F>(&self, direction: Direction, callback: F)
    where
        F: 'static + Fn(&Poller<C>, Event, &IoContext<C>),
    {
        if let Some(op) = self.slot(direction) {
            let old = op.callback.borrow_mut().replace(Rc::new(callback));
            drop(old);
        }
    }

    /// Detach the callback of the given direction.
    pub fn clear_callback(&self, direction: Direction) {
        if let Some(op) = self.slot(direction) {
            let old = op.callback.borrow_mut().take();
            drop(old);
        }
    }

    /// Test if a callback is attached to the given direction.
    pub fn has_callback(&self, direction: Direction) -> bool {
        self.slot(direction)
            .map(|op| op.callback.borrow().is_some())
            .unwrap_or(false)
    }

    /// Attach the callback notified when the poller terminates while this
    /// context is still watched.
    pub fn set_notify<F>(&self, callback: F)
    where
        F: 'static + Fn(&Poller<C>, Event, &IoContext<C>),
    {
        if self.is_retired() {
            return;
        }

        let old = self.inner.notify.borrow_mut().replace(Rc::new(callback));
        drop(old);
    }

    /// Detach the termination notification callback.
    pub fn clear_notify(&self) {
        let old = self.inner.notify.borrow_mut().take();
        drop(old);
    }

    /// Test if a termination notification callback is attached.
    pub fn has_notify(&self) -> bool {
        self.inner.notify.borrow().is_some()
    }

    pub(crate) fn notify(&self) -> Option<Callback<C>> {
        self.inner.notify.borrow().clone()
    }

    /// The state of the given direction.
    pub fn state(&self, direction: Direction) -> SlotState {
        if let Some(op) = self.slot(direction) {
            return op.state();
        }

        match self.inner.zombie(direction) {
            Some(op) => op.state(),
            None => SlotState::RetiringDone,
        }
    }

    /// Test if an operation is outstanding in the given direction.
    pub fn is_pending(&self, direction: Direction) -> bool {
        self.slot(direction)
            .or_else(|| self.inner.zombie(direction))
            .map(|op| op.contains(OpFlags::AWAITING))
            .unwrap_or(false)
    }

    /// Test if completions in the given direction are currently swallowed.
    pub fn is_done(&self, direction: Direction) -> bool {
        self.slot(direction)
            .map(|op| op.contains(OpFlags::DONE))
            .unwrap_or(true)
    }

    /// Access the scratch state of the given direction.
    ///
    /// Returns `None` while an operation is outstanding, since the OS may be
    /// writing into it, or once the context is retired.
    pub fn with_scratch<F, O>(&self, direction: Direction, f: F) -> Option<O>
    where
        F: FnOnce(&mut Scratch) -> O,
    {
        let op = self.slot(direction)?;

        if op.contains(OpFlags::AWAITING) {
            return None;
        }

        let mut scratch = op.scratch.try_borrow_mut().ok()?;
        Some(f(&mut scratch))
    }

    /// Take the byte count of a read which completed after the read
    /// direction was marked done.
    pub fn take_stashed_read(&self) -> Option<usize> {
        let op = self.slot(Direction::Read)?;

        if op.contains(OpFlags::AWAITING) {
            return None;
        }

        let mut scratch = op.scratch.borrow_mut();
        scratch.stashed.take()
    }
}

impl<C> Clone for IoContext<C>
where
    C: Channel,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> PartialEq for IoContext<C>
where
    C: Channel,
{
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<C> Eq for IoContext<C> where C: Channel {}

impl<C> fmt::Debug for IoContext<C>
where
    C: Channel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoContext")
            .field("socket", &self.inner.socket)
            .field("read", &self.state(Direction::Read))
            .field("write", &self.state(Direction::Write))
            .finish()
    }
}
