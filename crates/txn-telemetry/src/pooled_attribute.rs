//! Pooled, reference-counted attribute instances.
//!
//! A [`PooledAttribute`] is a cheap handle to a slot leased from an
//! [`AttributePool`]. Containers that hold the attribute take a reference with
//! [`add_reference`](PooledAttribute::add_reference) and give it up with
//! [`remove_reference`](PooledAttribute::remove_reference). The call that moves
//! the count from one to zero resets the slot and hands it back to its pool.
//!
//! ```text
//!   create ──► set_value* ──► make_immutable ──► add_reference (×n)
//!                                                     │
//!                               remove_reference (×n) ▼
//!                                           count 1 → 0: reset + return
//! ```

use crate::definition::{AttributeClassification, AttributeDefinition};
use crate::invariants::debug_assert_released_once;
use crate::value::{AttributeValue, LazyValue};
use adaptive_pool::{AdaptivePool, PoolFlag, Poolable, ReturnError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Pool of attribute slots.
pub type AttributePool = AdaptivePool<Arc<AttributeSlot>>;

/// Builds an attribute pool from a pool configuration.
pub fn attribute_pool(config: adaptive_pool::PoolConfig) -> AttributePool {
    AdaptivePool::with_config(config, || Arc::new(AttributeSlot::default()))
}

/// Storage behind a [`PooledAttribute`].
///
/// Public only so it can name the pool's item type; all access goes through
/// the handle.
#[derive(Default)]
pub struct AttributeSlot {
    state: Mutex<SlotState>,
    ref_count: AtomicU32,
    flag: PoolFlag,
}

#[derive(Default)]
struct SlotState {
    definition: Option<Arc<AttributeDefinition>>,
    value: Option<AttributeValue>,
    lazy: Option<LazyValue>,
    immutable: bool,
    home: Weak<AttributePool>,
}

impl SlotState {
    fn reset(&mut self) {
        self.definition = None;
        self.value = None;
        self.lazy = None;
        self.immutable = false;
    }
}

impl Poolable for AttributeSlot {
    fn pool_flag(&self) -> &PoolFlag {
        &self.flag
    }
}

/// Handle to one pooled attribute instance.
///
/// Clones share the same instance; the reference count tracks containers,
/// not handles.
#[derive(Clone)]
pub struct PooledAttribute {
    slot: Arc<AttributeSlot>,
}

impl PooledAttribute {
    /// Leases an instance from `pool` and binds it to `definition`.
    pub fn create(pool: &Arc<AttributePool>, definition: Arc<AttributeDefinition>) -> Self {
        let slot = pool.take();
        {
            let mut state = slot.state.lock();
            state.reset();
            state.definition = Some(definition);
            state.home = Arc::downgrade(pool);
        }
        slot.ref_count.store(0, Ordering::Release);
        Self { slot }
    }

    /// Leases a new instance carrying `other`'s definition and its resolved
    /// value, or its pending lazy value when nothing is resolved yet.
    ///
    /// Returns `None` if `other` has already been released.
    pub fn create_from(pool: &Arc<AttributePool>, other: &PooledAttribute) -> Option<Self> {
        let (definition, value, lazy) = {
            let state = other.slot.state.lock();
            (
                state.definition.clone()?,
                state.value.clone(),
                state.lazy.clone(),
            )
        };

        let copy = Self::create(pool, definition);
        match (value, lazy) {
            (Some(value), _) => copy.set_value(value),
            (None, Some(lazy)) => copy.set_lazy_value(lazy),
            (None, None) => {}
        }
        Some(copy)
    }

    /// Assigns a value. Ignored once the attribute is immutable.
    pub fn set_value(&self, value: impl Into<AttributeValue>) {
        let value = value.into();
        let mut state = self.slot.state.lock();
        if !state.immutable {
            state.value = Some(value);
        }
    }

    /// Assigns a value if there is one. `None` is ignored.
    pub fn set_value_opt<V: Into<AttributeValue>>(&self, value: Option<V>) {
        if let Some(value) = value {
            self.set_value(value);
        }
    }

    /// Assigns a deferred value. Ignored once the attribute is immutable.
    pub fn set_lazy_value(&self, lazy: LazyValue) {
        let mut state = self.slot.state.lock();
        if !state.immutable {
            state.lazy = Some(lazy);
        }
    }

    /// Freezes the attribute, resolving a pending lazy value first if no
    /// value has been assigned.
    pub fn make_immutable(&self) {
        let pending = {
            let state = self.slot.state.lock();
            if state.immutable {
                return;
            }
            match state.value {
                Some(_) => None,
                None => state.lazy.clone(),
            }
        };

        // The thunk is user code; run it without holding the slot lock
        let forced = pending.and_then(|lazy| lazy.force().cloned());

        let mut state = self.slot.state.lock();
        if state.immutable {
            return;
        }
        if state.value.is_none() {
            state.value = forced;
        }
        state.immutable = true;
    }

    /// Takes a reference on behalf of a container.
    pub fn add_reference(&self) {
        self.slot.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Gives up a container's reference.
    ///
    /// The count never drops below zero: calls made at zero do nothing.
    /// Returns `true` for the single call that moved the count to zero; that
    /// call also resets the instance and returns it to its pool, unless the
    /// definition marks its values as cached.
    pub fn remove_reference(&self) -> bool {
        let previous = self
            .slot
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });

        match previous {
            Ok(1) => {
                self.release();
                true
            }
            _ => false,
        }
    }

    fn release(&self) {
        let home = {
            let mut state = self.slot.state.lock();
            if state
                .definition
                .as_ref()
                .is_some_and(|definition| definition.values_are_cached())
            {
                // Lifetime is owned by the definition's cache
                return;
            }
            debug_assert_released_once!(state.definition.is_some());
            state.reset();
            state.home.upgrade()
        };

        let Some(pool) = home else {
            return;
        };

        match pool.put(Arc::clone(&self.slot)) {
            Ok(()) | Err(ReturnError::Overflow { .. }) => {}
            Err(err) => tracing::warn!(error = %err, "attribute slot rejected by its pool"),
        }
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.slot.ref_count.load(Ordering::Acquire)
    }

    /// The bound definition, or `None` once the instance has been released.
    pub fn definition(&self) -> Option<Arc<AttributeDefinition>> {
        self.slot.state.lock().definition.clone()
    }

    pub fn name(&self) -> Option<Arc<str>> {
        self.slot
            .state
            .lock()
            .definition
            .as_ref()
            .map(|definition| Arc::clone(definition.shared_name()))
    }

    pub fn classification(&self) -> Option<AttributeClassification> {
        self.slot
            .state
            .lock()
            .definition
            .as_ref()
            .map(|definition| definition.classification())
    }

    /// The assigned (or, after freezing, resolved) value.
    pub fn value(&self) -> Option<AttributeValue> {
        self.slot.state.lock().value.clone()
    }

    /// The pending deferred value, if one was assigned.
    pub fn lazy_value(&self) -> Option<LazyValue> {
        self.slot.state.lock().lazy.clone()
    }

    pub fn is_immutable(&self) -> bool {
        self.slot.state.lock().immutable
    }

    /// Returns `true` if both handles point at the same instance.
    #[inline]
    pub fn ptr_eq(&self, other: &PooledAttribute) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for PooledAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.slot.state.lock();
        f.debug_struct("PooledAttribute")
            .field("name", &state.definition.as_ref().map(|d| d.name()))
            .field("value", &state.value)
            .field("lazy", &state.lazy)
            .field("immutable", &state.immutable)
            .field("ref_count", &self.slot.ref_count.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptive_pool::SMALL_POOL_CONFIG;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn pool() -> Arc<AttributePool> {
        Arc::new(attribute_pool(SMALL_POOL_CONFIG))
    }

    #[test]
    fn test_set_value_until_immutable() {
        let pool = pool();
        let attr = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::user("color")));

        attr.set_value("red");
        attr.set_value("blue");
        assert_eq!(attr.value(), Some(AttributeValue::from("blue")));

        attr.make_immutable();
        attr.set_value("green");
        attr.set_lazy_value(LazyValue::from_fn(|| "lazy"));
        assert_eq!(attr.value(), Some(AttributeValue::from("blue")));
        assert!(attr.lazy_value().is_none());
        assert!(attr.is_immutable());
    }

    #[test]
    fn test_none_value_is_ignored() {
        let pool = pool();
        let attr = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::user("n")));
        attr.set_value(1i32);
        attr.set_value_opt(None::<i32>);
        assert_eq!(attr.value(), Some(AttributeValue::Int(1)));
    }

    #[test]
    fn test_make_immutable_forces_lazy_once() {
        let pool = pool();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let attr = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::agent("db")));
        attr.set_lazy_value(LazyValue::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            "postgres"
        }));

        assert_eq!(attr.value(), None);
        attr.make_immutable();
        attr.make_immutable();
        assert_eq!(attr.value(), Some(AttributeValue::from("postgres")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_assigned_value_wins_over_lazy() {
        let pool = pool();
        let attr = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::agent("k")));
        attr.set_lazy_value(LazyValue::from_fn(|| 1i64));
        attr.set_value(2i64);
        attr.make_immutable();
        assert_eq!(attr.value(), Some(AttributeValue::Int(2)));
    }

    #[test]
    fn test_create_from_copies_value_or_lazy() {
        let pool = pool();
        let def = Arc::new(AttributeDefinition::user("k"));

        let resolved = PooledAttribute::create(&pool, Arc::clone(&def));
        resolved.set_value(5u8);
        let copy = PooledAttribute::create_from(&pool, &resolved).unwrap();
        assert!(!copy.ptr_eq(&resolved));
        assert_eq!(copy.value(), Some(AttributeValue::Int(5)));
        assert_eq!(copy.name().as_deref(), Some("k"));

        let pending = PooledAttribute::create(&pool, def);
        pending.set_lazy_value(LazyValue::from_fn(|| true));
        let copy = PooledAttribute::create_from(&pool, &pending).unwrap();
        assert_eq!(copy.value(), None);
        assert!(copy.lazy_value().is_some());
    }

    #[test]
    fn test_last_reference_resets_and_returns() {
        let pool = pool();
        let attr = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::user("k")));
        attr.set_value("v");
        attr.make_immutable();
        attr.add_reference();
        attr.add_reference();

        assert!(!attr.remove_reference());
        assert_eq!(pool.len(), 0);
        assert!(attr.remove_reference());
        assert_eq!(pool.len(), 1);

        assert_eq!(attr.ref_count(), 0);
        assert!(attr.definition().is_none());
        assert!(attr.value().is_none());
        assert!(!attr.is_immutable());

        // Floor at zero
        assert!(!attr.remove_reference());
        assert_eq!(attr.ref_count(), 0);
        assert_eq!(pool.stats().window.returns, 1);
    }

    #[test]
    fn test_released_slot_is_reused() {
        let pool = pool();
        let first = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::user("a")));
        first.add_reference();
        first.remove_reference();

        let second = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::user("b")));
        assert!(second.ptr_eq(&first));
        assert_eq!(second.name().as_deref(), Some("b"));
        assert_eq!(second.value(), None);
    }

    #[test]
    fn test_cached_definition_is_never_pooled() {
        let pool = pool();
        let def = Arc::new(AttributeDefinition::agent("host").cached());
        let attr = PooledAttribute::create(&pool, def);
        attr.set_value("web-1");
        attr.make_immutable();
        attr.add_reference();

        assert!(attr.remove_reference());
        assert_eq!(pool.len(), 0);
        assert_eq!(attr.value(), Some(AttributeValue::from("web-1")));
        assert!(attr.is_immutable());
        assert!(attr.definition().is_some());
    }

    #[test]
    fn test_concurrent_over_release_returns_once() {
        const THREADS: usize = 8;

        for _ in 0..100 {
            let pool = pool();
            let attr = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::user("k")));
            attr.add_reference();
            attr.add_reference();

            let barrier = Arc::new(Barrier::new(THREADS));
            let releases = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let attr = attr.clone();
                    let barrier = Arc::clone(&barrier);
                    let releases = Arc::clone(&releases);
                    thread::spawn(move || {
                        barrier.wait();
                        if attr.remove_reference() {
                            releases.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(releases.load(Ordering::SeqCst), 1);
            assert_eq!(attr.ref_count(), 0);
            assert_eq!(pool.len(), 1);
            assert_eq!(pool.stats().window.returns, 1);
        }
    }

    #[test]
    fn test_release_after_pool_dropped() {
        let pool = pool();
        let attr = PooledAttribute::create(&pool, Arc::new(AttributeDefinition::user("k")));
        attr.add_reference();
        drop(pool);

        assert!(attr.remove_reference());
        assert!(attr.definition().is_none());
    }
}
