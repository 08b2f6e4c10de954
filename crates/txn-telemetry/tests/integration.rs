use adaptive_pool::MaintenanceConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use txn_telemetry::{
    send_batch, AttributeClassification, AttributeCollection, AttributeDefinition, BatchConfig,
    ConstantSampler, ErrorData, ExportError, PooledAttribute, RequestMetadata, RetryConfig,
    RetryingExporter, SpanBatch, SpanBatcher, SpanExporter, SpanRecord, TelemetryConfig,
    TelemetryPools,
};

/// Records display names; fails while `failures` is non-zero.
struct RecordingExporter {
    names: Mutex<Vec<String>>,
    failures: AtomicU32,
}

impl RecordingExporter {
    fn new() -> Self {
        Self::failing(0)
    }

    fn failing(failures: u32) -> Self {
        Self {
            names: Mutex::new(Vec::new()),
            failures: AtomicU32::new(failures),
        }
    }

    fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }
}

impl SpanExporter for RecordingExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        let fail = self
            .failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(ExportError::Transport("collector down".into()));
        }
        self.names
            .lock()
            .extend(batch.records().iter().map(|record| record.display_name()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn span(pools: &Arc<TelemetryPools>, trace: &str, guid: usize) -> Box<SpanRecord> {
    let collection = AttributeCollection::new(Arc::clone(pools));
    collection.set(&AttributeDefinition::trace_id(), trace);
    collection.set(&AttributeDefinition::guid(), format!("{guid:04}"));
    collection.set(&Arc::new(AttributeDefinition::agent("db.table")), "orders");
    collection.into_record().unwrap()
}

#[tokio::test]
async fn test_end_to_end_batch_export() {
    let pools = TelemetryPools::new(&TelemetryConfig::small());
    let exporter = RecordingExporter::new();
    let mut batcher = SpanBatcher::new(BatchConfig::default().with_batch_size_limit(4));

    for guid in 0..4 {
        batcher.add(span(&pools, "trace", guid));
    }
    assert!(batcher.should_flush());
    batcher.flush(&exporter).await.unwrap();

    assert_eq!(
        exporter.names(),
        vec!["trace.0000", "trace.0001", "trace.0002", "trace.0003"]
    );
    assert_eq!(batcher.total_pending(), 0);
    assert_eq!(batcher.metrics().records_exported, 4);
    // Records and their attributes are back in the pools
    assert_eq!(pools.spans.len(), 4);
    assert!(!pools.attributes.is_empty());
}

#[tokio::test]
async fn test_successful_send_drains_batch() {
    let pools = TelemetryPools::new(&TelemetryConfig::small());
    let mut batch = SpanBatch::new();
    for guid in 0..3 {
        batch.add(span(&pools, "t", guid));
    }

    send_batch(&RecordingExporter::new(), &mut batch).await.unwrap();

    assert_eq!(batch.count(), 0);
    assert!(batch.records().is_empty());
    assert!(batch.is_empty());
}

#[tokio::test]
async fn test_failed_send_leaves_batch_untouched() {
    let pools = TelemetryPools::new(&TelemetryConfig::small());
    let exporter = RecordingExporter::failing(2);
    let mut batch = SpanBatch::new();
    for guid in 0..3 {
        batch.add(span(&pools, "t", guid));
    }

    for _ in 0..2 {
        assert!(send_batch(&exporter, &mut batch).await.is_err());
        assert_eq!(batch.count(), 3);
        assert_eq!(batch.records()[2].display_name(), "t.0002");
        assert_eq!(
            batch.records()[0]
                .attributes(AttributeClassification::AgentAttributes)
                .len(),
            1
        );
        assert_eq!(pools.spans.len(), 0);
    }

    send_batch(&exporter, &mut batch).await.unwrap();
    assert_eq!(exporter.names().len(), 3);
    assert_eq!(pools.spans.len(), 3);
}

#[tokio::test]
async fn test_retrying_exporter_recovers_through_batcher() {
    let pools = TelemetryPools::new(&TelemetryConfig::small());
    let exporter = RetryingExporter::new(
        RecordingExporter::failing(2),
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
    );
    let mut batcher = SpanBatcher::new(BatchConfig::default());
    batcher.add(span(&pools, "r", 1));

    batcher.flush(&exporter).await.unwrap();

    assert_eq!(exporter.inner().names(), vec!["r.0001"]);
    assert_eq!(exporter.recovered_exports(), 1);
    assert_eq!(batcher.metrics().export_errors, 0);
}

#[test]
fn test_display_name_from_identity_attributes() {
    let pools = TelemetryPools::new(&TelemetryConfig::small());
    let collection = AttributeCollection::new(Arc::clone(&pools));
    assert_eq!(collection.display_name(), ".");

    collection.set(&AttributeDefinition::trace_id(), "t");
    collection.set(&AttributeDefinition::guid(), "s");
    assert_eq!(collection.display_name(), "t.s");

    let record = collection.into_record().unwrap();
    assert_eq!(record.display_name(), "t.s");
    assert_eq!(record.trace_id(), "t");
    assert_eq!(record.span_id(), "s");
    record.release();
}

#[test]
fn test_overwrite_moves_references_between_instances() {
    let pools = TelemetryPools::new(&TelemetryConfig::small());
    let definition = Arc::new(AttributeDefinition::user("plan"));

    let shared = PooledAttribute::create(&pools.attributes, Arc::clone(&definition));
    shared.set_value("gold");

    let first = AttributeCollection::new(Arc::clone(&pools));
    let second = AttributeCollection::new(Arc::clone(&pools));
    assert!(first.set_attribute(&shared));
    assert!(second.set_attribute(&shared));
    assert_eq!(shared.ref_count(), 2);

    let replacement = PooledAttribute::create(&pools.attributes, Arc::clone(&definition));
    replacement.set_value("silver");
    assert!(!first.set_attribute(&replacement));

    assert_eq!(shared.ref_count(), 1);
    assert_eq!(replacement.ref_count(), 1);
    assert_eq!(
        first
            .get(AttributeClassification::UserAttributes, "plan")
            .and_then(|attr| attr.value()),
        Some("silver".into())
    );
    assert_eq!(
        second
            .get(AttributeClassification::UserAttributes, "plan")
            .and_then(|attr| attr.value()),
        Some("gold".into())
    );

    drop(second);
    assert_eq!(shared.ref_count(), 0);
    assert!(shared.definition().is_none());
}

#[test]
fn test_concurrent_metadata_writes_then_freeze() {
    let metadata = Arc::new(RequestMetadata::default());

    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let metadata = Arc::clone(&metadata);
            thread::spawn(move || {
                for i in 0..10 {
                    metadata.add_request_parameter(format!("w{writer}p{i}"), "v");
                    metadata.set_cross_application_path_hash(format!("{writer:02}{i:02}"));
                }
                metadata.add_custom_error_data(ErrorData::new("Custom", format!("writer {writer}")));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    metadata.set_uri("/checkout");
    assert!(metadata.set_sampled(&ConstantSampler::always()));
    let snapshot = metadata.freeze();

    assert_eq!(snapshot.uri.as_deref(), Some("/checkout"));
    assert_eq!(snapshot.request_parameters.len(), 40);
    assert_eq!(snapshot.custom_error_datas.len(), 4);
    assert!(snapshot.latest_cross_application_path_hash.is_some());
    assert_eq!(
        snapshot.alternate_cross_application_path_hashes.len(),
        metadata.limits().alternate_path_hash_max
    );
    assert!(snapshot.distributed_trace_sampled);

    // Later writes do not reach an existing snapshot
    metadata.set_uri("/other");
    assert_eq!(snapshot.uri.as_deref(), Some("/checkout"));
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_shrinks_idle_pools() {
    let config = TelemetryConfig::small();
    let pools = TelemetryPools::new(&config);
    assert_eq!(pools.attributes.capacity(), 8);

    let handle = pools
        .maintainer(MaintenanceConfig::new(
            Duration::from_secs(5),
            Duration::from_secs(30),
        ))
        .start();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(handle.ticks(), 0);
    assert_eq!(pools.spans.capacity(), 8);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handle.ticks(), 1);
    assert_eq!(pools.attributes.capacity(), 4);
    assert_eq!(pools.spans.capacity(), 4);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.ticks(), 2);
    assert_eq!(pools.attributes.capacity(), 2);
    assert!(handle.is_running());

    handle.stop().await.unwrap();
}
