use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-window pool counters.
///
/// `takes` and `returns` are bumped from every producer thread, so each
/// counter sits on its own cache line. All accesses are `Relaxed`: the values
/// only feed capacity smoothing and diagnostics, never control flow that
/// guards other data.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    takes: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    returns: CachePadded<AtomicU64>,
    overflow: CachePadded<AtomicU64>,
}

impl PoolCounters {
    #[inline]
    pub(crate) fn record_take(&self) {
        self.takes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_return(&self) {
        self.returns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_overflow(&self) {
        self.overflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads the current window without resetting it.
    pub(crate) fn load(&self) -> WindowCounts {
        WindowCounts {
            takes: self.takes.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
        }
    }

    /// Reads and resets every counter (one exchange per counter).
    pub(crate) fn drain(&self) -> WindowCounts {
        WindowCounts {
            takes: self.takes.swap(0, Ordering::Relaxed),
            misses: self.misses.swap(0, Ordering::Relaxed),
            returns: self.returns.swap(0, Ordering::Relaxed),
            overflow: self.overflow.swap(0, Ordering::Relaxed),
        }
    }
}

/// Counter values for one maintenance window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub takes: u64,
    pub misses: u64,
    pub returns: u64,
    pub overflow: u64,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Counters accumulated since the last maintenance tick
    pub window: WindowCounts,
    /// Current target capacity
    pub capacity: usize,
    /// Items currently stored and ready to be taken
    pub available: usize,
}

/// Outcome of one maintenance tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityUpdate {
    /// Pool name (the pooled type's name)
    pub pool: String,
    /// Counters drained by this tick
    pub window: WindowCounts,
    pub old_capacity: usize,
    pub new_capacity: usize,
    /// Items discarded to bring storage back under the new capacity
    pub reclaimed: usize,
}
