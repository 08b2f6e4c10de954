//! Debug assertion macros for pool invariants.
//!
//! Only active in debug builds (`debug_assert!`), so release builds pay nothing.

// =============================================================================
// INV-POOL-01: Exclusive Ownership
// =============================================================================

/// Assert that an item leaving storage was flagged as pooled.
///
/// **Invariant**: an item is in storage ⟺ its pooled flag is set. A dequeued
/// item with a cleared flag means somebody cleared it while it was stored.
///
/// Used in: `take()` after dequeue
macro_rules! debug_assert_flag_was_set {
    ($was_set:expr, $pool:expr) => {
        debug_assert!(
            $was_set,
            "INV-POOL-01 violated: pool {} stored an item whose pooled flag was clear",
            $pool
        )
    };
}

// =============================================================================
// INV-POOL-02: Bounded Storage
// =============================================================================

/// Assert that storage never grows past the capacity in force at enqueue time.
///
/// **Invariant**: `stored ≤ capacity` immediately after a successful return
///
/// Used in: `put()` after enqueue
macro_rules! debug_assert_bounded_storage {
    ($stored:expr, $capacity:expr) => {
        debug_assert!(
            $stored <= $capacity,
            "INV-POOL-02 violated: stored {} exceeds capacity {}",
            $stored,
            $capacity
        )
    };
}

// =============================================================================
// INV-POOL-03: Smoothing Stays Between Old Capacity And Demand
// =============================================================================

/// Assert that the smoothed capacity lies between the old capacity and the
/// window's take count.
///
/// **Invariant**: `min(old, takes) ≤ new ≤ max(old, takes)`
///
/// Used in: `update_capacity()`
macro_rules! debug_assert_smoothed {
    ($old:expr, $takes:expr, $new:expr) => {
        debug_assert!(
            $new >= $old.min($takes) && $new <= $old.max($takes),
            "INV-POOL-03 violated: capacity {} -> {} with {} takes",
            $old,
            $new,
            $takes
        )
    };
}

pub(crate) use debug_assert_bounded_storage;
pub(crate) use debug_assert_flag_was_set;
pub(crate) use debug_assert_smoothed;
