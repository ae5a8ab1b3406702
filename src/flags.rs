//! Directions, operation kinds and the state bits tracked per op-context.

use bitflags::bitflags;

/// The slot of an io-context an operation is issued through.
///
/// Each io-context holds exactly one op-context per direction, so at most one
/// read-like and one write-like operation can be outstanding per socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The read slot, also used for accepting connections.
    Read,
    /// The write slot, also used for connecting.
    Write,
}

impl Direction {
    /// Both directions, in the order they are visited during a broadcast.
    pub const ALL: [Direction; 2] = [Direction::Read, Direction::Write];
}

/// The kind of overlapped operation submitted through an op-context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// An overlapped accept on a listening socket.
    Accept,
    /// An overlapped receive.
    Read,
    /// An overlapped send.
    Write,
    /// An overlapped connect.
    Connect,
}

bitflags! {
    /// State bits of a single op-context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct OpFlags: u8 {
        /// An operation has been handed to the OS and has not completed yet.
        const AWAITING = 1 << 0;
        /// Completions are swallowed instead of dispatched.
        const DONE = 1 << 1;
        /// The owning io-context is gone, the op-context only lives until its
        /// outstanding completion has been absorbed.
        const RETIRING = 1 << 2;
    }
}

bitflags! {
    /// Readiness interest, as understood by readiness-based pollers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Interest: u8 {
        /// Interested in the socket becoming readable.
        const READABLE = 1 << 0;
        /// Interested in the socket becoming writable.
        const WRITABLE = 1 << 1;
    }
}

/// The observable state of an op-context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing is outstanding.
    Idle,
    /// An operation is outstanding and its completion will be dispatched.
    Armed,
    /// An operation is outstanding but its completion will be swallowed.
    Suppressed,
    /// The io-context is retired and the slot waits for its last completion.
    RetiringPending,
    /// The io-context is retired and the slot has been released.
    RetiringDone,
}

impl SlotState {
    pub(crate) fn from_flags(flags: OpFlags) -> Self {
        let awaiting = flags.contains(OpFlags::AWAITING);

        if flags.contains(OpFlags::RETIRING) {
            if awaiting {
                SlotState::RetiringPending
            } else {
                SlotState::RetiringDone
            }
        } else if !awaiting {
            SlotState::Idle
        } else if flags.contains(OpFlags::DONE) {
            SlotState::Suppressed
        } else {
            SlotState::Armed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_state_follows_flags() {
        assert_eq!(SlotState::from_flags(OpFlags::empty()), SlotState::Idle);
        assert_eq!(SlotState::from_flags(OpFlags::DONE), SlotState::Idle);
        assert_eq!(SlotState::from_flags(OpFlags::AWAITING), SlotState::Armed);
        assert_eq!(
            SlotState::from_flags(OpFlags::AWAITING | OpFlags::DONE),
            SlotState::Suppressed
        );
        assert_eq!(
            SlotState::from_flags(OpFlags::AWAITING | OpFlags::DONE | OpFlags::RETIRING),
            SlotState::RetiringPending
        );
        assert_eq!(
            SlotState::from_flags(OpFlags::DONE | OpFlags::RETIRING),
            SlotState::RetiringDone
        );
    }
}
