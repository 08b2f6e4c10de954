//! Debug assertion macros for telemetry invariants.
//!
//! Only active in debug builds (`debug_assert!`), so release builds pay nothing.

// =============================================================================
// INV-ATTR-01: Single Release
// =============================================================================

/// Assert that a slot being reset still carries a definition.
///
/// **Invariant**: exactly one caller observes the 1 → 0 transition, so the
/// reset path never runs on an already-reset slot.
///
/// Used in: `PooledAttribute::remove_reference()`
macro_rules! debug_assert_released_once {
    ($has_definition:expr) => {
        debug_assert!(
            $has_definition,
            "INV-ATTR-01 violated: attribute slot reset twice"
        )
    };
}

// =============================================================================
// INV-META-01: User Attribute Clamp
// =============================================================================

/// Assert that the user-attribute map never exceeds its clamp.
///
/// **Invariant**: `len ≤ clamp` after every `add_user_attribute`
///
/// Used in: `RequestMetadata::add_user_attribute()`
macro_rules! debug_assert_clamped {
    ($len:expr, $clamp:expr) => {
        debug_assert!(
            $len <= $clamp,
            "INV-META-01 violated: {} user attributes exceed clamp {}",
            $len,
            $clamp
        )
    };
}

// =============================================================================
// INV-BATCH-01: Sent Batches Are Empty
// =============================================================================

/// Assert that a batch holds no records after a successful send.
///
/// Used in: `SpanBatch::on_successful_send()`
macro_rules! debug_assert_batch_drained {
    ($count:expr) => {
        debug_assert!(
            $count == 0,
            "INV-BATCH-01 violated: {} records left after successful send",
            $count
        )
    };
}

pub(crate) use debug_assert_batch_drained;
pub(crate) use debug_assert_clamped;
pub(crate) use debug_assert_released_once;
