use std::cell::Cell;

/// Allocation and dispatch counters of a poller.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) io_allocated: Cell<usize>,
    pub(crate) io_released: Cell<usize>,
    pub(crate) op_allocated: Cell<usize>,
    pub(crate) op_released: Cell<usize>,
    pub(crate) pending: Cell<usize>,
    pub(crate) discarded: Cell<usize>,
    pub(crate) dropped_accepts: Cell<usize>,
}

impl Counters {
    #[inline]
    pub(crate) fn incr(cell: &Cell<usize>) {
        cell.set(cell.get().wrapping_add(1));
    }

    #[inline]
    pub(crate) fn decr(cell: &Cell<usize>) {
        cell.set(cell.get().saturating_sub(1));
    }

    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            io_allocated: self.io_allocated.get(),
            io_released: self.io_released.get(),
            op_allocated: self.op_allocated.get(),
            op_released: self.op_released.get(),
            pending: self.pending.get(),
            discarded: self.discarded.get(),
            dropped_accepts: self.dropped_accepts.get(),
        }
    }
}

/// A snapshot of the counters kept by a [Poller][crate::Poller].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct Stats {
    /// Io-contexts allocated by `begin_watching`.
    pub io_allocated: usize,
    /// Io-contexts whose memory has been released.
    pub io_released: usize,
    /// Op-contexts allocated, two per io-context.
    pub op_allocated: usize,
    /// Op-contexts whose memory has been released.
    pub op_released: usize,
    /// Operations handed to the OS whose completion has not been drained.
    pub pending: usize,
    /// Completions swallowed because their slot was done or retiring.
    pub discarded: usize,
    /// Accepts dropped because the OS reported a failure or the post-accept
    /// socket fixup failed.
    pub dropped_accepts: usize,
}

impl Stats {
    /// Test if every allocated context has been released.
    pub fn is_balanced(&self) -> bool {
        self.io_allocated == self.io_released && self.op_allocated == self.op_released
    }
}
