//! Span Batcher - Size/Time Triggered Batching
//!
//! Groups finished span records into [`SpanBatch`]es and decides when to
//! flush them. Like the rest of the export side it is a plain sequential
//! abstraction: the exporter is passed to [`SpanBatcher::flush`] rather than
//! stored, and metrics are plain `u64`s.
//!
//! A batch whose export fails stays queued, records and all, and is offered
//! again (ahead of newer records) on the next flush. Its records go back to
//! the pools once a send succeeds. At most `max_retry_batches` failed batches
//! are kept; past that the oldest is dropped and its records released.
//!
//! ```rust,ignore
//! let mut batcher = SpanBatcher::new(BatchConfig::default());
//! batcher.add(collection.into_record()?);
//!
//! if batcher.should_flush() {
//!     batcher.flush(&exporter).await?;
//! }
//! ```

use crate::config::BatchConfig;
use crate::exporter::{send_batch, ExportError, SpanExporterBoxed};
use crate::span::{SpanBatch, SpanRecord};
use std::collections::VecDeque;
use tokio::time::Instant;

/// Metrics for batch processing (plain u64, sequential use)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchMetrics {
    /// Total records delivered
    pub records_exported: u64,
    /// Total batches delivered
    pub batches_exported: u64,
    /// Total failed export attempts
    pub export_errors: u64,
    /// Failed batches dropped to keep the retry queue bounded
    pub dropped_batches: u64,
    /// Records in those dropped batches
    pub dropped_records: u64,
}

impl BatchMetrics {
    pub fn record_success(&mut self, record_count: u64) {
        self.records_exported += record_count;
        self.batches_exported += 1;
    }

    pub fn record_error(&mut self) {
        self.export_errors += 1;
    }

    pub fn record_dropped(&mut self, record_count: u64) {
        self.dropped_batches += 1;
        self.dropped_records += record_count;
    }
}

/// Accumulates span records and flushes them in batches.
#[derive(Debug)]
pub struct SpanBatcher {
    /// Records not yet assigned to a batch
    pending: Vec<Box<SpanRecord>>,
    /// Batches whose last export failed, oldest first
    retry: VecDeque<SpanBatch>,
    config: BatchConfig,
    metrics: BatchMetrics,
    last_flush: Instant,
}

impl SpanBatcher {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            pending: Vec::new(),
            retry: VecDeque::new(),
            config,
            metrics: BatchMetrics::default(),
            last_flush: Instant::now(),
        }
    }

    pub fn add(&mut self, record: Box<SpanRecord>) {
        self.pending.push(record);
    }

    /// Records waiting for delivery, including those in failed batches.
    pub fn total_pending(&self) -> usize {
        self.pending.len() + self.retry.iter().map(SpanBatch::count).sum::<usize>()
    }

    /// Number of batches waiting for a retry.
    pub fn retry_batches(&self) -> usize {
        self.retry.len()
    }

    pub fn should_flush(&self) -> bool {
        let pending = self.total_pending();
        pending > 0
            && (pending >= self.config.batch_size_limit
                || self.last_flush.elapsed() >= self.config.batch_timeout)
    }

    /// Sends queued retry batches, then the pending records as a new batch.
    ///
    /// Stops at the first failure; that batch and everything behind it stay
    /// queued for the next flush.
    pub async fn flush(&mut self, exporter: &dyn SpanExporterBoxed) -> Result<(), ExportError> {
        if let Some(batch) = self.take_batch() {
            self.retry.push_back(batch);
        }

        while let Some(mut batch) = self.retry.pop_front() {
            let record_count = batch.count() as u64;
            match send_batch(exporter, &mut batch).await {
                Ok(()) => self.metrics.record_success(record_count),
                Err(err) => {
                    self.metrics.record_error();
                    self.retry.push_front(batch);
                    self.trim_retry_queue();
                    return Err(err);
                }
            }
        }

        self.last_flush = Instant::now();
        Ok(())
    }

    /// Drops the oldest failed batches until the queue fits the bound.
    fn trim_retry_queue(&mut self) {
        while self.retry.len() > self.config.max_retry_batches {
            let Some(oldest) = self.retry.pop_front() else {
                break;
            };
            let record_count = oldest.count() as u64;
            tracing::warn!(
                records = record_count,
                limit = self.config.max_retry_batches,
                "retry queue full, dropping oldest span batch"
            );
            self.metrics.record_dropped(record_count);
            oldest.discard(true);
        }
    }

    /// Takes all pending records as a batch (for export managed elsewhere).
    ///
    /// Returns `None` if nothing is pending. Queued retry batches are not
    /// included.
    pub fn take_batch(&mut self) -> Option<SpanBatch> {
        if self.pending.is_empty() {
            return None;
        }

        let records = std::mem::take(&mut self.pending);
        self.last_flush = Instant::now();
        Some(SpanBatch::with_records(records))
    }

    pub fn metrics(&self) -> &BatchMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut BatchMetrics {
        &mut self.metrics
    }
}
