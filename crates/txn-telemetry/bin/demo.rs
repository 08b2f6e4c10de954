//! # Transaction Telemetry Demo
//!
//! End-to-end run of the capture core against a flaky collector.
//!
//! ## What It Shows
//!
//! ### 1. Concurrent Transaction Capture
//! - Worker threads each simulate transactions
//! - Per transaction, a handler thread and an instrumentation-callback thread
//!   write into one shared `RequestMetadata`
//! - A sampling decision is made once, then the record is frozen
//!
//! ### 2. Pooled Span Records
//! - Spans are built with `AttributeCollection` (pooled, reference-counted
//!   attributes, lazy values resolved at freeze time)
//! - Records travel to the exporter task over a tokio channel
//!
//! ### 3. Release-On-Send Export
//! - `SpanBatcher` flushes on size or timeout
//! - A `RetryingExporter` wraps a backend that fails at random
//! - Failed batches stay intact and are retried; records return to the
//!   pools only after a successful send
//!
//! ### 4. Pool Maintenance
//! - A `PoolMaintainer` ticks both pools in the background
//! - Final pool statistics are logged at the end
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (2 workers, 20 transactions each)
//! RUST_LOG=info cargo run -p txn-telemetry --bin demo --release -- --quick
//!
//! # Full mode (8 workers, 200 transactions each)
//! RUST_LOG=info cargo run -p txn-telemetry --bin demo --release
//!
//! # Per-span export lines and pool ticks
//! RUST_LOG=debug cargo run -p txn-telemetry --bin demo --release -- --verbose
//! ```

use adaptive_pool::MaintenanceConfig;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use txn_telemetry::{
    AttributeCollection, AttributeDefinition, BatchConfig, ConstantSampler, ErrorData,
    ExportError, LazyValue, LoggingExporter, MetadataLimits, RequestMetadata, RetryConfig, RetryingExporter,
    SpanBatch, SpanBatcher, SpanExporter, SpanRecord, TelemetryConfig, TelemetryPools,
    TransportType,
};

// =============================================================================
// FLAKY BACKEND
// =============================================================================

/// Backend that fails a fraction of exports after a short simulated latency.
struct FlakyBackend {
    failure_rate: f64,
    latency: Duration,
    verbose: bool,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl FlakyBackend {
    fn new(failure_rate: f64, latency: Duration, verbose: bool) -> Self {
        Self {
            failure_rate,
            latency,
            verbose,
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

impl SpanExporter for FlakyBackend {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        if rand::random::<f64>() < self.failure_rate {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(ExportError::Transport(format!(
                "collector unavailable (batch of {} records)",
                batch.count()
            )));
        }

        if self.verbose {
            LoggingExporter::new().export(batch).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky_backend"
    }
}

// =============================================================================
// TRANSACTION SIMULATION
// =============================================================================

struct Definitions {
    trace_id: Arc<AttributeDefinition>,
    guid: Arc<AttributeDefinition>,
    name: Arc<AttributeDefinition>,
    duration: Arc<AttributeDefinition>,
    db_statement: Arc<AttributeDefinition>,
    host: Arc<AttributeDefinition>,
    customer: Arc<AttributeDefinition>,
}

impl Definitions {
    fn new() -> Self {
        Self {
            trace_id: AttributeDefinition::trace_id(),
            guid: AttributeDefinition::guid(),
            name: Arc::new(AttributeDefinition::intrinsic("name")),
            duration: Arc::new(AttributeDefinition::intrinsic("duration")),
            db_statement: Arc::new(AttributeDefinition::agent("db.statement")),
            host: Arc::new(AttributeDefinition::agent("host").cached()),
            customer: Arc::new(AttributeDefinition::user("customer.tier")),
        }
    }
}

fn simulate_transaction(
    worker: usize,
    txn: usize,
    pools: &Arc<TelemetryPools>,
    defs: &Definitions,
    limits: MetadataLimits,
    records: &mpsc::Sender<Box<SpanRecord>>,
) -> Result<(), mpsc::error::SendError<Box<SpanRecord>>> {
    let mut rng = rand::thread_rng();
    let trace_id = format!("{:016x}", rng.gen::<u64>());
    let metadata = RequestMetadata::new(limits);
    metadata.set_priority(rng.gen::<f32>());

    // Handler thread and an instrumentation callback write concurrently
    thread::scope(|scope| {
        scope.spawn(|| {
            metadata.set_uri(format!("/orders/{txn}"));
            metadata.set_queue_time(Duration::from_micros(250));
            metadata.add_request_parameter("worker", worker.to_string());
            metadata.set_http_response_status_code(if txn % 17 == 0 { 500 } else { 200 }, None);
            for i in 0..8 {
                metadata.add_user_attribute(format!("attr{i}"), i * txn);
            }
        });
        scope.spawn(|| {
            metadata.set_distributed_trace_trace_id(trace_id.clone());
            metadata.set_distributed_trace_guid(format!("{worker}-{txn}"));
            metadata.set_distributed_trace_transport_type(TransportType::Https);
            metadata.set_cross_application_path_hash(format!("{:08x}", txn % 4));
            metadata.set_cross_application_path_hash(format!("{:08x}", txn % 3));
            if txn % 17 == 0 {
                metadata.add_exception_data(ErrorData::new("HttpError", "upstream timeout"));
            }
        });
    });

    metadata.set_sampled(&ConstantSampler::new(txn % 2 == 0));
    let snapshot = metadata.freeze();
    tracing::debug!(
        worker,
        txn,
        uri = snapshot.uri.as_deref().unwrap_or(""),
        sampled = snapshot.distributed_trace_sampled,
        errors = snapshot.all_errors().count(),
        alternates = snapshot.alternate_cross_application_path_hashes.len(),
        "transaction frozen"
    );

    for span in 0..3 {
        let collection = AttributeCollection::new(Arc::clone(pools));
        collection.set(&defs.trace_id, trace_id.as_str());
        collection.set(&defs.guid, format!("{worker:02}{txn:04}{span:02}"));
        collection.set(&defs.name, format!("Datastore/orders/select/{span}"));
        collection.set(&defs.duration, Duration::from_micros(rng.gen_range(50..5_000)));
        collection.set(&defs.host, "demo-host");
        collection.set(&defs.customer, if txn % 3 == 0 { "gold" } else { "basic" });
        collection.set_lazy(
            &defs.db_statement,
            LazyValue::from_fn(move || format!("SELECT * FROM orders WHERE id = {txn}")),
        );
        collection.set_priority(snapshot.priority);

        if let Some(record) = collection.into_record() {
            records.blocking_send(record)?;
        }
    }
    Ok(())
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose");
    let quick = args.iter().any(|a| a == "--quick");
    let (workers, transactions) = if quick { (2, 20) } else { (8, 200) };

    let config = TelemetryConfig::new()
        .with_maintenance(MaintenanceConfig::new(Duration::from_millis(200), Duration::from_millis(500)))
        .with_batch(
            BatchConfig::default()
                .with_batch_size_limit(64)
                .with_batch_timeout(Duration::from_millis(100)),
        );
    tracing::info!(workers, transactions, "starting demo");

    let pools = TelemetryPools::new(&config);
    let maintenance = pools.maintainer(config.maintenance).start();

    let exporter = RetryingExporter::new(
        FlakyBackend::new(0.3, Duration::from_millis(2), verbose),
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        },
    );

    // Consumer: batch records and export them
    let (tx, mut rx) = mpsc::channel::<Box<SpanRecord>>(1_024);
    let batch_config = config.batch.clone();
    let consumer = tokio::spawn(async move {
        let mut batcher = SpanBatcher::new(batch_config);
        let mut tick = tokio::time::interval(Duration::from_millis(50));

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(record) => batcher.add(record),
                    None => break,
                },
                _ = tick.tick() => {}
            }
            if batcher.should_flush() {
                if let Err(err) = batcher.flush(&exporter).await {
                    tracing::warn!(error = %err, pending = batcher.total_pending(), "flush failed");
                }
            }
        }

        // Drain: keep retrying until delivered or we give up
        for _ in 0..10 {
            if batcher.total_pending() == 0 {
                break;
            }
            if let Err(err) = batcher.flush(&exporter).await {
                tracing::warn!(error = %err, "final flush failed");
            }
        }
        (batcher, exporter)
    });

    // Producers: plain threads
    let started = Instant::now();
    let defs = Arc::new(Definitions::new());
    let limits = config.metadata;
    let producers: Vec<_> = (0..workers)
        .map(|worker| {
            let pools = Arc::clone(&pools);
            let defs = Arc::clone(&defs);
            let tx = tx.clone();
            thread::spawn(move || {
                for txn in 0..transactions {
                    if simulate_transaction(worker, txn, &pools, &defs, limits, &tx).is_err() {
                        tracing::error!(worker, "exporter task gone");
                        return;
                    }
                }
            })
        })
        .collect();
    drop(tx);

    tokio::task::spawn_blocking(move || {
        for producer in producers {
            if producer.join().is_err() {
                tracing::error!("producer thread panicked");
            }
        }
    })
    .await?;
    let generation_time = started.elapsed();

    let (batcher, exporter) = consumer.await?;
    maintenance.stop().await?;

    let metrics = batcher.metrics();
    let backend = exporter.inner();
    let (attribute_stats, span_stats) = pools.stats();
    tracing::info!(
        elapsed = ?started.elapsed(),
        generation = ?generation_time,
        records_exported = metrics.records_exported,
        batches_exported = metrics.batches_exported,
        export_errors = metrics.export_errors,
        left_pending = batcher.total_pending(),
        "export finished"
    );
    tracing::info!(
        attempts = backend.attempts.load(Ordering::Relaxed),
        failures = backend.failures.load(Ordering::Relaxed),
        retries = exporter.total_retries(),
        recovered = exporter.recovered_exports(),
        "backend statistics"
    );
    tracing::info!(
        attribute_capacity = attribute_stats.capacity,
        attribute_available = attribute_stats.available,
        span_capacity = span_stats.capacity,
        span_available = span_stats.available,
        "pool statistics"
    );

    Ok(())
}
