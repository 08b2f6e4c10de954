use crate::definition::{AttributeClassification, AttributeDefinition, KEY_GUID, KEY_TRACE_ID};
use crate::pooled_attribute::PooledAttribute;
use crate::pools::TelemetryPools;
use crate::span::SpanRecord;
use crate::value::{AttributeValue, LazyValue};
use std::collections::hash_map::Entry;
use std::sync::Arc;

/// Span-level attribute writer.
///
/// Wraps a leased [`SpanRecord`] and writes into its three classified maps.
/// All write methods take `&self`; each classification has its own lock.
/// Converting with [`into_record`](Self::into_record) freezes the attributes
/// and hands the record to the batching side. Dropping an unconverted
/// collection returns the record to its pool.
pub struct AttributeCollection {
    pools: Arc<TelemetryPools>,
    record: Option<Box<SpanRecord>>,
}

impl AttributeCollection {
    /// Leases a fresh record from `pools`.
    pub fn new(pools: Arc<TelemetryPools>) -> Self {
        let record = SpanRecord::lease(&pools.spans);
        Self {
            pools,
            record: Some(record),
        }
    }

    /// Sets `definition` to `value`. Returns `true` on a fresh insert.
    pub fn set(&self, definition: &Arc<AttributeDefinition>, value: impl Into<AttributeValue>) -> bool {
        let attr = PooledAttribute::create(&self.pools.attributes, Arc::clone(definition));
        attr.set_value(value);
        self.install(attr)
    }

    /// Sets `definition` to a deferred value. Returns `true` on a fresh insert.
    pub fn set_lazy(&self, definition: &Arc<AttributeDefinition>, lazy: LazyValue) -> bool {
        let attr = PooledAttribute::create(&self.pools.attributes, Arc::clone(definition));
        attr.set_lazy_value(lazy);
        self.install(attr)
    }

    /// Installs an existing attribute instance, sharing it with whatever else
    /// references it. Returns `true` on a fresh insert; setting the instance
    /// that is already installed under its name returns `false` and changes
    /// nothing.
    pub fn set_attribute(&self, attr: &PooledAttribute) -> bool {
        self.install(attr.clone())
    }

    fn install(&self, attr: PooledAttribute) -> bool {
        let Some(record) = self.record.as_deref() else {
            return false;
        };
        let Some(definition) = attr.definition() else {
            return false;
        };

        if definition.is_identity() {
            let id = attr.value().map(|value| value.to_string()).unwrap_or_default();
            match definition.name() {
                KEY_TRACE_ID => record.set_trace_id(id),
                KEY_GUID => record.set_span_id(id),
                _ => {}
            }
        }

        let name = Arc::clone(definition.shared_name());
        let mut map = record.attributes(definition.classification());
        match map.entry(name) {
            Entry::Occupied(mut entry) => {
                if entry.get().ptr_eq(&attr) {
                    return false;
                }
                // Release the old value before taking the new reference; the
                // name never goes missing because the lock is held throughout
                entry.get().remove_reference();
                attr.add_reference();
                entry.insert(attr);
                false
            }
            Entry::Vacant(entry) => {
                attr.add_reference();
                entry.insert(attr);
                true
            }
        }
    }

    /// Removes the given attributes, locking each classification once.
    ///
    /// An entry is removed only if the map still holds that exact instance
    /// under its name; each removed instance loses the collection's reference.
    /// Returns the number removed.
    pub fn remove_many<'a, I>(&self, attrs: I) -> usize
    where
        I: IntoIterator<Item = &'a PooledAttribute>,
    {
        let Some(record) = self.record.as_deref() else {
            return 0;
        };

        let mut grouped: [Vec<(Arc<str>, &PooledAttribute)>; 3] = Default::default();
        for attr in attrs {
            if let Some(definition) = attr.definition() {
                grouped[definition.classification().index()]
                    .push((Arc::clone(definition.shared_name()), attr));
            }
        }

        let mut removed = 0;
        for class in AttributeClassification::ALL {
            let group = &grouped[class.index()];
            if group.is_empty() {
                continue;
            }

            let mut map = record.attributes(class);
            for (name, attr) in group {
                if map.get(name).is_some_and(|current| current.ptr_eq(attr)) {
                    map.remove(name);
                    attr.remove_reference();
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Snapshot of one classification's attributes.
    pub fn get_all(&self, classification: AttributeClassification) -> Vec<PooledAttribute> {
        self.record.as_deref().map_or_else(Vec::new, |record| {
            record.attributes(classification).values().cloned().collect()
        })
    }

    pub fn get(&self, classification: AttributeClassification, name: &str) -> Option<PooledAttribute> {
        let record = self.record.as_deref()?;
        let map = record.attributes(classification);
        map.get(name).cloned()
    }

    pub fn len(&self, classification: AttributeClassification) -> usize {
        self.record
            .as_deref()
            .map_or(0, |record| record.attributes(classification).len())
    }

    pub fn is_empty(&self) -> bool {
        self.record
            .as_deref()
            .map_or(true, |record| record.attribute_count() == 0)
    }

    /// `"<trace id>.<span id>"` of the underlying record.
    pub fn display_name(&self) -> String {
        self.record
            .as_deref()
            .map(SpanRecord::display_name)
            .unwrap_or_default()
    }

    pub fn priority(&self) -> f32 {
        self.record.as_deref().map_or(0.0, SpanRecord::priority)
    }

    pub fn set_priority(&self, priority: f32) {
        if let Some(record) = self.record.as_deref() {
            record.set_priority(priority);
        }
    }

    /// Freezes every attribute currently held.
    pub fn make_immutable(&self) {
        for class in AttributeClassification::ALL {
            // Copy out first: freezing may run lazy thunks
            for attr in self.get_all(class) {
                attr.make_immutable();
            }
        }
    }

    /// Freezes all attributes and hands out the populated record.
    pub fn into_record(mut self) -> Option<Box<SpanRecord>> {
        self.make_immutable();
        self.record.take()
    }
}

impl Drop for AttributeCollection {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            record.release();
        }
    }
}

impl std::fmt::Debug for AttributeCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeCollection")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn collection() -> (AttributeCollection, Arc<TelemetryPools>) {
        let pools = TelemetryPools::new(&TelemetryConfig::small());
        (AttributeCollection::new(Arc::clone(&pools)), pools)
    }

    #[test]
    fn test_fresh_insert_then_overwrite() {
        let (collection, _) = collection();
        let def = Arc::new(AttributeDefinition::user("color"));

        assert!(collection.set(&def, "red"));
        assert!(!collection.set(&def, "blue"));
        assert_eq!(collection.len(AttributeClassification::UserAttributes), 1);
        assert_eq!(
            collection
                .get(AttributeClassification::UserAttributes, "color")
                .and_then(|attr| attr.value()),
            Some(AttributeValue::from("blue"))
        );
    }

    #[test]
    fn test_overwrite_moves_one_reference() {
        let (collection, pools) = collection();
        let def = Arc::new(AttributeDefinition::agent("k"));

        let old = PooledAttribute::create(&pools.attributes, Arc::clone(&def));
        old.add_reference(); // held elsewhere too
        assert!(collection.set_attribute(&old));
        assert_eq!(old.ref_count(), 2);

        let new = PooledAttribute::create(&pools.attributes, Arc::clone(&def));
        assert!(!collection.set_attribute(&new));

        assert_eq!(old.ref_count(), 1);
        assert_eq!(new.ref_count(), 1);
        assert_eq!(collection.len(AttributeClassification::AgentAttributes), 1);
    }

    #[test]
    fn test_same_instance_is_noop() {
        let (collection, pools) = collection();
        let attr = PooledAttribute::create(&pools.attributes, Arc::new(AttributeDefinition::user("k")));

        assert!(collection.set_attribute(&attr));
        assert!(!collection.set_attribute(&attr));
        assert_eq!(attr.ref_count(), 1);
    }

    #[test]
    fn test_identity_attributes_set_display_name() {
        let (collection, _) = collection();
        collection.set(&AttributeDefinition::trace_id(), "t");
        collection.set(&AttributeDefinition::guid(), "s");
        assert_eq!(collection.display_name(), "t.s");
        assert_eq!(collection.len(AttributeClassification::Intrinsics), 2);
    }

    #[test]
    fn test_identity_follows_name_in_any_classification() {
        let (collection, _) = collection();
        collection.set(&Arc::new(AttributeDefinition::agent(KEY_TRACE_ID)), "t");
        collection.set(&Arc::new(AttributeDefinition::user(KEY_GUID)), "s");
        assert_eq!(collection.display_name(), "t.s");
        assert_eq!(collection.len(AttributeClassification::Intrinsics), 0);
        assert_eq!(collection.len(AttributeClassification::AgentAttributes), 1);
        assert_eq!(collection.len(AttributeClassification::UserAttributes), 1);
    }

    #[test]
    fn test_remove_many_checks_identity() {
        let (collection, pools) = collection();
        let a = Arc::new(AttributeDefinition::user("a"));
        let b = Arc::new(AttributeDefinition::agent("b"));

        collection.set(&a, 1i32);
        collection.set(&b, 2i32);
        let installed_a = collection.get(AttributeClassification::UserAttributes, "a").unwrap();
        let installed_b = collection.get(AttributeClassification::AgentAttributes, "b").unwrap();
        let stranger = PooledAttribute::create(&pools.attributes, Arc::clone(&a));

        let removed = collection.remove_many([&installed_a, &installed_b, &stranger]);

        assert_eq!(removed, 2);
        assert!(collection.is_empty());
        assert_eq!(installed_a.ref_count(), 0);
        assert_eq!(installed_b.ref_count(), 0);
        assert_eq!(pools.attributes.len(), 2);
    }

    #[test]
    fn test_into_record_freezes_lazy_values() {
        let (collection, _) = collection();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        collection.set_lazy(
            &Arc::new(AttributeDefinition::agent("sql")),
            LazyValue::from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                "SELECT 1"
            }),
        );

        let record = collection.into_record().unwrap();
        let map = record.attributes(AttributeClassification::AgentAttributes);
        let attr = map.get("sql").unwrap();
        assert!(attr.is_immutable());
        assert_eq!(attr.value(), Some(AttributeValue::from("SELECT 1")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_returns_record_and_attributes() {
        let (collection, pools) = collection();
        collection.set(&Arc::new(AttributeDefinition::user("k")), "v");
        drop(collection);

        assert_eq!(pools.spans.len(), 1);
        assert_eq!(pools.attributes.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_across_classifications() {
        const THREADS: usize = 6;
        const NAMES: usize = 20;

        let (collection, _) = collection();
        let collection = Arc::new(collection);

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let collection = Arc::clone(&collection);
                thread::spawn(move || {
                    let class = AttributeClassification::ALL[t % 3];
                    for round in 0..50 {
                        for n in 0..NAMES {
                            let def = Arc::new(AttributeDefinition::new(format!("k{n}"), class));
                            collection.set(&def, round);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for class in AttributeClassification::ALL {
            let attrs = collection.get_all(class);
            assert_eq!(attrs.len(), NAMES);
            assert!(attrs.iter().all(|attr| attr.ref_count() == 1));
        }
    }
}
