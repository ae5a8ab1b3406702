use crate::channel::Channel;
use crate::context::IoInner;
use crate::event::Callback;
use crate::flags::{Direction, OpFlags, OpKind, SlotState};
use crate::stats::Counters;
use crate::sys::RawSocket;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Per-operation state which lives next to the descriptor.
///
/// Anything stored in here may be written by the OS while an operation is
/// outstanding, which is why it's only reachable through a [Submission] or
/// while the slot is idle.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct Scratch {
    /// The socket an accept is performed into. Must be set before an accept
    /// is submitted.
    pub accepted: Option<RawSocket>,
    /// The buffer a receive is performed into.
    pub buffer: Option<Box<[u8]>>,
    /// Storage for the peer address of a receive-from or accept.
    pub address: Option<Box<[u8]>>,
    /// The length of the address written into `address`.
    pub address_len: i32,
    /// The byte count of a read which completed after its slot was marked
    /// done.
    pub stashed: Option<usize>,
}

/// A single direction of an io-context, pairing the OS descriptor with the
/// callback and state bits of the operation going through it.
#[repr(C)]
pub(crate) struct OpContext<C>
where
    C: Channel,
{
    /// Must stay the first field, the OS hands back pointers to it.
    overlapped: UnsafeCell<C::Overlapped>,
    pub(crate) socket: RawSocket,
    pub(crate) direction: Direction,
    pub(crate) kind: Cell<Option<OpKind>>,
    flags: Cell<OpFlags>,
    pub(crate) callback: RefCell<Option<Callback<C>>>,
    pub(crate) scratch: RefCell<Scratch>,
    pub(crate) owner: Weak<IoInner<C>>,
    channel: C,
    counters: Rc<Counters>,
}

impl<C> OpContext<C>
where
    C: Channel,
{
    pub(crate) fn new(
        socket: RawSocket,
        direction: Direction,
        owner: Weak<IoInner<C>>,
        channel: C,
        counters: Rc<Counters>,
    ) -> Self {
        Counters::incr(&counters.op_allocated);

        Self {
            overlapped: UnsafeCell::new(C::Overlapped::default()),
            socket,
            direction,
            kind: Cell::new(None),
            flags: Cell::new(OpFlags::empty()),
            callback: RefCell::new(None),
            scratch: RefCell::new(Scratch::default()),
            owner,
            channel,
            counters,
        }
    }

    #[inline]
    pub(crate) fn insert(&self, flags: OpFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    #[inline]
    pub(crate) fn remove(&self, flags: OpFlags) {
        self.flags.set(self.flags.get() - flags);
    }

    #[inline]
    pub(crate) fn contains(&self, flags: OpFlags) -> bool {
        self.flags.get().contains(flags)
    }

    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_flags(self.flags.get())
    }

    /// Zero the descriptor ahead of a new submission.
    ///
    /// # Safety
    ///
    /// No operation may be outstanding.
    pub(crate) unsafe fn reset(&self) {
        debug_assert!(!self.contains(OpFlags::AWAITING));
        *self.overlapped.get() = C::Overlapped::default();
    }

    /// Hand one strong reference to the OS, returning the pointer it will be
    /// reclaimed through.
    pub(crate) fn into_overlapped(this: Rc<Self>) -> *mut C::Overlapped {
        Rc::into_raw(this) as *const C::Overlapped as *mut C::Overlapped
    }

    /// Reclaim the strong reference previously handed to the OS.
    ///
    /// # Safety
    ///
    /// The pointer must come from [into_overlapped][Self::into_overlapped] and
    /// must not be reclaimed more than once.
    pub(crate) unsafe fn from_overlapped(overlapped: *mut C::Overlapped) -> Rc<Self> {
        Rc::from_raw(overlapped as *const Self)
    }

    pub(crate) fn as_overlapped(&self) -> *mut C::Overlapped {
        self.overlapped.get()
    }

    pub(crate) fn callback(&self) -> Option<Callback<C>> {
        self.callback.borrow().clone()
    }
}

impl<C> Drop for OpContext<C>
where
    C: Channel,
{
    fn drop(&mut self) {
        // Nobody can reach the scratch state anymore.
        if let Some(accepted) = self.scratch.get_mut().accepted.take() {
            debug!(
                socket = self.socket,
                accepted = accepted,
                "closing accepted socket of released op context"
            );

            self.channel.close(accepted);
        }

        trace!(socket = self.socket, direction = ?self.direction, "op context released");
        Counters::incr(&self.counters.op_released);
    }
}

impl<C> fmt::Debug for OpContext<C>
where
    C: Channel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("socket", &self.socket)
            .field("direction", &self.direction)
            .field("kind", &self.kind.get())
            .field("flags", &self.flags.get())
            .finish()
    }
}

/// Access handed to the closure performing a native overlapped call.
///
/// The descriptor behind [overlapped][Submission::overlapped] belongs to the
/// OS from the moment the call reports the operation as queued, until the
/// poller drains its completion.
pub struct Submission<'a, O> {
    pub(crate) socket: RawSocket,
    pub(crate) kind: OpKind,
    pub(crate) overlapped: *mut O,
    pub(crate) scratch: &'a mut Scratch,
}

impl<O> Submission<'_, O> {
    /// The socket the operation is issued over. For accepts, this is the
    /// listening socket.
    pub fn socket(&self) -> RawSocket {
        self.socket
    }

    /// The kind of operation being submitted.
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Raw pointer to the zeroed descriptor to pass to the native call.
    pub fn overlapped(&self) -> *mut O {
        self.overlapped
    }

    /// Per-operation scratch state, such as the socket to accept into or the
    /// buffer to receive into.
    pub fn scratch(&mut self) -> &mut Scratch {
        self.scratch
    }
}

impl<O> fmt::Debug for Submission<'_, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("socket", &self.socket)
            .field("kind", &self.kind)
            .field("overlapped", &self.overlapped)
            .finish()
    }
}
