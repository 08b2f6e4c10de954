use crate::definition::AttributeClassification;
use crate::invariants::debug_assert_batch_drained;
use crate::pooled_attribute::PooledAttribute;
use adaptive_pool::{AdaptivePool, PoolFlag, Poolable, ReturnError};
use parking_lot::{Mutex, MutexGuard};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

/// Pool of span records.
pub type SpanRecordPool = AdaptivePool<Box<SpanRecord>>;

/// Builds a span-record pool from a pool configuration.
pub fn span_record_pool(config: adaptive_pool::PoolConfig) -> SpanRecordPool {
    AdaptivePool::with_config(config, || Box::new(SpanRecord::default()))
}

/// Name → attribute map for one classification.
pub type AttributeMap = HashMap<Arc<str>, PooledAttribute>;

/// Trace and span identifiers of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanIdentity {
    pub trace_id: String,
    pub span_id: String,
}

/// Pooled wire-format container for one span.
///
/// Holds the identity pair and three classified attribute maps, each behind
/// its own lock so writers to different classifications never contend.
#[derive(Default)]
pub struct SpanRecord {
    identity: Mutex<SpanIdentity>,
    maps: [Mutex<AttributeMap>; 3],
    priority: AtomicU32,
    home: Weak<SpanRecordPool>,
    flag: PoolFlag,
}

impl Poolable for SpanRecord {
    fn pool_flag(&self) -> &PoolFlag {
        &self.flag
    }
}

impl SpanRecord {
    /// Leases a cleared record from `pool`.
    pub fn lease(pool: &Arc<SpanRecordPool>) -> Box<Self> {
        let mut record = pool.take();
        record.home = Arc::downgrade(pool);
        record
    }

    /// `"<trace id>.<span id>"`
    pub fn display_name(&self) -> String {
        let identity = self.identity.lock();
        format!("{}.{}", identity.trace_id, identity.span_id)
    }

    pub fn identity(&self) -> SpanIdentity {
        self.identity.lock().clone()
    }

    pub fn trace_id(&self) -> String {
        self.identity.lock().trace_id.clone()
    }

    pub fn span_id(&self) -> String {
        self.identity.lock().span_id.clone()
    }

    pub(crate) fn set_trace_id(&self, trace_id: String) {
        self.identity.lock().trace_id = trace_id;
    }

    pub(crate) fn set_span_id(&self, span_id: String) {
        self.identity.lock().span_id = span_id;
    }

    /// Locks one classification's map.
    ///
    /// Hold the guard only for the duration of a read or serialization pass.
    pub fn attributes(&self, classification: AttributeClassification) -> MutexGuard<'_, AttributeMap> {
        self.maps[classification.index()].lock()
    }

    /// Total attribute count across all classifications.
    pub fn attribute_count(&self) -> usize {
        self.maps.iter().map(|map| map.lock().len()).sum()
    }

    pub fn priority(&self) -> f32 {
        f32::from_bits(self.priority.load(Ordering::Relaxed))
    }

    pub fn set_priority(&self, priority: f32) {
        self.priority.store(priority.to_bits(), Ordering::Relaxed);
    }

    /// Releases every attribute reference, clears identity and maps, and
    /// returns the record to the pool it was leased from.
    pub fn release(self: Box<Self>) {
        self.clear();

        let Some(pool) = self.home.upgrade() else {
            return;
        };
        match pool.put(self) {
            Ok(()) | Err(ReturnError::Overflow { .. }) => {}
            Err(err) => tracing::warn!(error = %err, "span record rejected by its pool"),
        }
    }

    fn clear(&self) {
        for map in &self.maps {
            let drained: Vec<PooledAttribute> = map.lock().drain().map(|(_, attr)| attr).collect();
            for attr in drained {
                attr.remove_reference();
            }
        }
        *self.identity.lock() = SpanIdentity::default();
        self.priority.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for SpanRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanRecord")
            .field("identity", &*self.identity.lock())
            .field("attributes", &self.attribute_count())
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}

struct ResolvedMap<'a>(&'a AttributeMap);

impl Serialize for ResolvedMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let resolved: Vec<_> = self
            .0
            .iter()
            .filter_map(|(name, attr)| attr.value().map(|value| (name, value)))
            .collect();

        let mut map = serializer.serialize_map(Some(resolved.len()))?;
        for (name, value) in &resolved {
            map.serialize_entry(name.as_ref(), value)?;
        }
        map.end()
    }
}

impl Serialize for SpanRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let identity = self.identity();
        let mut state = serializer.serialize_struct("SpanRecord", 6)?;
        state.serialize_field("traceId", &identity.trace_id)?;
        state.serialize_field("spanId", &identity.span_id)?;
        state.serialize_field("priority", &self.priority())?;
        state.serialize_field(
            "intrinsics",
            &ResolvedMap(&self.attributes(AttributeClassification::Intrinsics)),
        )?;
        state.serialize_field(
            "agentAttributes",
            &ResolvedMap(&self.attributes(AttributeClassification::AgentAttributes)),
        )?;
        state.serialize_field(
            "userAttributes",
            &ResolvedMap(&self.attributes(AttributeClassification::UserAttributes)),
        )?;
        state.end()
    }
}

/// Ordered group of span records handed to the transport as one unit.
///
/// Records go back to their pool only through
/// [`on_successful_send`](Self::on_successful_send). A failed export changes
/// nothing, so the same batch can be offered again.
#[derive(Debug)]
pub struct SpanBatch {
    records: Vec<Box<SpanRecord>>,
    created_at: SystemTime,
}

impl SpanBatch {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    pub fn with_records(records: Vec<Box<SpanRecord>>) -> Self {
        Self {
            records,
            created_at: SystemTime::now(),
        }
    }

    pub fn add(&mut self, record: Box<SpanRecord>) {
        self.records.push(record);
    }

    /// Number of live records.
    #[inline]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Box<SpanRecord>] {
        &self.records
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Called by the transport after confirmed delivery: releases every
    /// record back to its pool and empties the batch.
    pub fn on_successful_send(&mut self) {
        for record in self.records.drain(..) {
            record.release();
        }
        debug_assert_batch_drained!(self.records.len());
    }

    /// Drops the batch without sending it.
    ///
    /// With `release_records` the records go back to their pool; otherwise
    /// they are simply freed and their attribute slots are not recycled.
    pub fn discard(mut self, release_records: bool) {
        if release_records {
            self.on_successful_send();
        }
    }
}

impl Default for SpanBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for SpanBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::AttributeDefinition;
    use crate::pooled_attribute::{attribute_pool, AttributePool};
    use adaptive_pool::SMALL_POOL_CONFIG;

    fn pools() -> (Arc<AttributePool>, Arc<SpanRecordPool>) {
        (
            Arc::new(attribute_pool(SMALL_POOL_CONFIG)),
            Arc::new(span_record_pool(SMALL_POOL_CONFIG)),
        )
    }

    fn insert(record: &SpanRecord, attr: PooledAttribute) {
        let def = attr.definition().unwrap();
        attr.add_reference();
        record
            .attributes(def.classification())
            .insert(Arc::from(def.name()), attr);
    }

    #[test]
    fn test_display_name() {
        let (_, spans) = pools();
        let record = SpanRecord::lease(&spans);
        record.set_trace_id("abc".into());
        record.set_span_id("123".into());
        assert_eq!(record.display_name(), "abc.123");
    }

    #[test]
    fn test_release_clears_and_returns_everything() {
        let (attrs, spans) = pools();
        let record = SpanRecord::lease(&spans);
        record.set_trace_id("t".into());
        record.set_priority(1.5);

        let attr = PooledAttribute::create(&attrs, Arc::new(AttributeDefinition::user("k")));
        attr.set_value("v");
        insert(&record, attr.clone());

        record.release();

        assert_eq!(spans.len(), 1);
        assert_eq!(attrs.len(), 1);
        assert_eq!(attr.ref_count(), 0);

        let reused = SpanRecord::lease(&spans);
        assert_eq!(reused.identity(), SpanIdentity::default());
        assert_eq!(reused.attribute_count(), 0);
        assert_eq!(reused.priority(), 0.0);
    }

    #[test]
    fn test_successful_send_empties_batch() {
        let (attrs, spans) = pools();
        let mut batch = SpanBatch::new();
        let mut held = Vec::new();

        for i in 0..3 {
            let record = SpanRecord::lease(&spans);
            let attr = PooledAttribute::create(&attrs, Arc::new(AttributeDefinition::agent("i")));
            attr.set_value(i);
            insert(&record, attr.clone());
            held.push(attr);
            batch.add(record);
        }
        assert_eq!(batch.count(), 3);

        batch.on_successful_send();

        assert_eq!(batch.count(), 0);
        assert!(held.iter().all(|attr| attr.ref_count() == 0));
        assert_eq!(spans.len(), 3);
        assert!(SpanRecord::lease(&spans).attribute_count() == 0);
    }

    #[test]
    fn test_discard_without_release_keeps_pool_empty() {
        let (_, spans) = pools();
        let mut batch = SpanBatch::new();
        batch.add(SpanRecord::lease(&spans));
        batch.discard(false);
        assert_eq!(spans.len(), 0);

        let mut batch = SpanBatch::new();
        batch.add(SpanRecord::lease(&spans));
        batch.discard(true);
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn test_serializes_resolved_values() {
        let (attrs, spans) = pools();
        let record = SpanRecord::lease(&spans);
        record.set_trace_id("t1".into());
        record.set_span_id("s1".into());

        let named = PooledAttribute::create(&attrs, Arc::new(AttributeDefinition::intrinsic("name")));
        named.set_value("GET /");
        insert(&record, named);
        let unresolved = PooledAttribute::create(&attrs, Arc::new(AttributeDefinition::user("empty")));
        insert(&record, unresolved);

        let json = serde_json::to_value(&*record).unwrap();
        assert_eq!(json["traceId"], "t1");
        assert_eq!(json["spanId"], "s1");
        assert_eq!(json["intrinsics"]["name"], "GET /");
        assert!(json["userAttributes"].as_object().unwrap().is_empty());
    }
}
