use crate::invariants::{
    debug_assert_bounded_storage, debug_assert_flag_was_set, debug_assert_smoothed,
};
use crate::metrics::{CapacityUpdate, PoolCounters, PoolStats};
use crate::PoolConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// OWNERSHIP PROTOCOL
// =============================================================================
//
// Every pooled item carries a `PoolFlag`. The flag is set exactly while the
// item sits in the pool's storage and is only ever flipped by the pool, under
// the storage lock:
//
// - `put()` sets it (false -> true) before enqueueing. A second `put()` of the
//   same shared item (e.g. two clones of one `Arc`) observes `true` and is
//   rejected, so an item can never be stored twice.
// - `take()` clears it (true -> false) after dequeueing. Because dequeue and
//   clear happen under one lock, two takers can never receive the same item.
//
// Counters live outside the lock and are purely statistical.
//
// =============================================================================

/// Marker stored inside every pooled item.
///
/// Only the pool can set or clear it; owners can only observe it.
#[derive(Debug, Default)]
pub struct PoolFlag(AtomicBool);

impl PoolFlag {
    /// Creates a cleared flag (item not in any pool).
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Returns `true` while the item sits in a pool's storage.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sets the flag. Returns `false` if it was already set.
    #[inline]
    fn mark_pooled(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    /// Clears the flag. Returns `false` if it was already clear.
    #[inline]
    fn clear(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Types that can live in an [`AdaptivePool`].
pub trait Poolable {
    /// The flag the pool uses to detect double returns.
    fn pool_flag(&self) -> &PoolFlag;
}

impl<T: Poolable + ?Sized> Poolable for Arc<T> {
    #[inline]
    fn pool_flag(&self) -> &PoolFlag {
        (**self).pool_flag()
    }
}

impl<T: Poolable + ?Sized> Poolable for Box<T> {
    #[inline]
    fn pool_flag(&self) -> &PoolFlag {
        (**self).pool_flag()
    }
}

/// Why a returned item was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReturnError {
    /// The item is already in the pool; nothing was changed.
    #[error("item is already pooled")]
    AlreadyPooled,
    /// The pool is at capacity; the item was dropped.
    #[error("pool is at capacity ({capacity}); item dropped")]
    Overflow {
        /// Capacity in force when the item was offered.
        capacity: usize,
    },
}

impl ReturnError {
    /// Returns `true` for caller misuse, as opposed to ordinary overflow.
    #[inline]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::AlreadyPooled)
    }
}

/// Thread-safe object pool whose capacity follows recent demand.
///
/// `take()` never fails: an empty pool manufactures a fresh item through the
/// factory. `put()` keeps the item only while under capacity. A maintenance
/// tick ([`update_capacity`](Self::update_capacity)) smooths the capacity
/// toward the number of takes seen since the previous tick and discards
/// surplus stored items.
pub struct AdaptivePool<T> {
    storage: Mutex<VecDeque<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    capacity: AtomicUsize,
    counters: PoolCounters,
    config: PoolConfig,
    name: &'static str,
}

impl<T: Poolable> AdaptivePool<T> {
    /// Creates a pool with the given starting capacity.
    pub fn new<F>(initial_capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_config(
            PoolConfig::default().with_initial_capacity(initial_capacity),
            factory,
        )
    }

    /// Creates a pool from a full configuration.
    pub fn with_config<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            storage: Mutex::new(VecDeque::with_capacity(config.initial_capacity)),
            factory: Box::new(factory),
            capacity: AtomicUsize::new(config.initial_capacity),
            counters: PoolCounters::default(),
            config,
            name: std::any::type_name::<T>(),
        }
    }

    /// Takes an item, reusing a stored one when available.
    pub fn take(&self) -> T {
        self.counters.record_take();

        {
            let mut storage = self.storage.lock();
            while let Some(item) = storage.pop_front() {
                let was_pooled = item.pool_flag().clear();
                debug_assert_flag_was_set!(was_pooled, self.name);
                if was_pooled {
                    return item;
                }
            }
        }

        self.counters.record_miss();
        (self.factory)()
    }

    /// Offers an item back to the pool.
    ///
    /// An item that is already pooled is rejected without touching any
    /// counter. Otherwise the return is counted and the item is either stored
    /// or, when the pool is full, counted as overflow and dropped.
    pub fn put(&self, item: T) -> Result<(), ReturnError> {
        if item.pool_flag().is_pooled() {
            return Err(ReturnError::AlreadyPooled);
        }

        let capacity = self.capacity.load(Ordering::Acquire);
        {
            let mut storage = self.storage.lock();
            if storage.len() < capacity {
                // A racing put of the same shared item may have won the flag
                // between the check above and the lock.
                if !item.pool_flag().mark_pooled() {
                    return Err(ReturnError::AlreadyPooled);
                }
                self.counters.record_return();
                storage.push_back(item);
                debug_assert_bounded_storage!(storage.len(), capacity);
                return Ok(());
            }
        }

        self.counters.record_return();
        self.counters.record_overflow();
        tracing::trace!(pool = self.name, capacity, "pool overflow, item dropped");
        Err(ReturnError::Overflow { capacity })
    }

    /// Boolean form of [`put`](Self::put): `true` if the item was stored.
    #[inline]
    pub fn give_back(&self, item: T) -> bool {
        self.put(item).is_ok()
    }

    /// Runs one maintenance step: drain the counters, smooth the capacity
    /// toward the window's demand, and reclaim surplus items.
    pub fn update_capacity(&self) -> CapacityUpdate {
        let window = self.counters.drain();

        let old_capacity = self.capacity.load(Ordering::Acquire);
        let takes = usize::try_from(window.takes).unwrap_or(usize::MAX);
        let new_capacity = smoothed_capacity(old_capacity, takes);
        debug_assert_smoothed!(old_capacity, takes, new_capacity);
        self.capacity.store(new_capacity, Ordering::Release);

        let reclaimed = self.reclaim(new_capacity);

        tracing::debug!(
            pool = self.name,
            takes = window.takes,
            misses = window.misses,
            returns = window.returns,
            overflow = window.overflow,
            reclaimed,
            old_capacity,
            new_capacity,
            "object pool stats"
        );

        CapacityUpdate {
            pool: self.name.to_string(),
            window,
            old_capacity,
            new_capacity,
            reclaimed,
        }
    }

    /// Discards stored items down to `capacity` once storage exceeds the
    /// reclaim threshold. Returns the number discarded.
    fn reclaim(&self, capacity: usize) -> usize {
        let surplus: Vec<T> = {
            let mut storage = self.storage.lock();
            if storage.len() as f64 <= self.config.reclaim_limit(capacity) {
                return 0;
            }
            let excess = storage.len() - capacity;
            storage.drain(..excess).collect()
        };

        // Dropped outside the lock; item destructors may be arbitrary.
        surplus.len()
    }

    /// Returns a snapshot of the current window and occupancy.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            window: self.counters.load(),
            capacity: self.capacity(),
            available: self.len(),
        }
    }

    /// Returns the current target capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Returns the number of stored items.
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    /// Returns `true` if no items are stored.
    pub fn is_empty(&self) -> bool {
        self.storage.lock().is_empty()
    }

    /// Returns the pool's name (the pooled type's name).
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl<T> fmt::Debug for AdaptivePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptivePool")
            .field("name", &self.name)
            .field("capacity", &self.capacity.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Exponential smoothing of capacity toward the last window's take count.
#[inline]
pub fn smoothed_capacity(old_capacity: usize, takes: usize) -> usize {
    // (old + takes) / 2 without overflowing usize
    old_capacity / 2 + takes / 2 + (old_capacity % 2 + takes % 2) / 2
}
