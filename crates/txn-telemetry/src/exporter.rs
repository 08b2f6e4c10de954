use crate::span::SpanBatch;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;

/// Error types for span export operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Transport-layer error (network, file, collector rejection)
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
    /// Export operation timed out
    #[error("export operation timed out")]
    Timeout,
}

/// Delivers span batches to a collector.
///
/// The batch is borrowed: a failed export leaves it untouched so it can be
/// offered again. Releasing records after delivery is the caller's job
/// (see [`send_batch`]).
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// For dynamic dispatch, use `Box<dyn SpanExporterBoxed>`.
pub trait SpanExporter: Send + Sync {
    /// Exports a batch of span records.
    fn export(&self, batch: &SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Boxed future returned by [`SpanExporterBoxed::export_boxed`].
pub type ExportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;

/// Object-safe version of [`SpanExporter`] for dynamic dispatch.
pub trait SpanExporterBoxed: Send + Sync {
    fn export_boxed<'a>(&'a self, batch: &'a SpanBatch) -> ExportFuture<'a>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any SpanExporter can be used as SpanExporterBoxed
impl<T: SpanExporter> SpanExporterBoxed for T {
    fn export_boxed<'a>(&'a self, batch: &'a SpanBatch) -> ExportFuture<'a> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        SpanExporter::name(self)
    }
}

/// Exports `batch` and, only if delivery succeeded, releases its records
/// back to their pools.
///
/// On failure the batch is left exactly as it was.
pub async fn send_batch(
    exporter: &dyn SpanExporterBoxed,
    batch: &mut SpanBatch,
) -> Result<(), ExportError> {
    match exporter.export_boxed(batch).await {
        Ok(()) => {
            batch.on_successful_send();
            Ok(())
        }
        Err(err) => {
            tracing::warn!(
                exporter = exporter.name(),
                records = batch.count(),
                error = %err,
                "span batch export failed, batch kept for retry"
            );
            Err(err)
        }
    }
}

/// Emits one `tracing` line per record.
#[derive(Debug, Default)]
pub struct LoggingExporter;

impl LoggingExporter {
    pub fn new() -> Self {
        Self
    }
}

impl SpanExporter for LoggingExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        for record in batch.records() {
            tracing::info!(
                span = %record.display_name(),
                attributes = record.attribute_count(),
                priority = record.priority(),
                "export span"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// JSON file exporter for local development.
///
/// Each export overwrites the file with the batch as a JSON array.
#[derive(Debug)]
pub struct JsonFileExporter {
    file_path: PathBuf,
}

impl JsonFileExporter {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl SpanExporter for JsonFileExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        let json = serde_json::to_vec_pretty(batch)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        tokio::fs::write(&self.file_path, json)
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Null exporter that accepts everything (for benchmarking)
#[derive(Debug, Default)]
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl SpanExporter for NullExporter {
    async fn export(&self, _batch: &SpanBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test exporter that records display names and fails on demand.
#[cfg(test)]
pub(crate) struct TestExporter {
    exported: parking_lot::Mutex<Vec<String>>,
    failures_remaining: std::sync::atomic::AtomicU32,
    attempts: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl TestExporter {
    pub(crate) fn new() -> Self {
        Self::failing(0)
    }

    /// Fails the first `failures` exports.
    pub(crate) fn failing(failures: u32) -> Self {
        Self {
            exported: parking_lot::Mutex::new(Vec::new()),
            failures_remaining: std::sync::atomic::AtomicU32::new(failures),
            attempts: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub(crate) fn exported(&self) -> Vec<String> {
        self.exported.lock().clone()
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
impl SpanExporter for TestExporter {
    async fn export(&self, batch: &SpanBatch) -> Result<(), ExportError> {
        use std::sync::atomic::Ordering;

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExportError::Transport("simulated failure".into()));
        }

        self.exported
            .lock()
            .extend(batch.records().iter().map(|record| record.display_name()));
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::pools::TelemetryPools;
    use crate::{AttributeCollection, AttributeDefinition};
    use std::sync::Arc;

    fn batch_of(pools: &Arc<TelemetryPools>, n: usize) -> SpanBatch {
        let mut batch = SpanBatch::new();
        for i in 0..n {
            let collection = AttributeCollection::new(Arc::clone(pools));
            collection.set(&AttributeDefinition::trace_id(), "trace");
            collection.set(&AttributeDefinition::guid(), format!("span-{i}"));
            batch.add(collection.into_record().unwrap());
        }
        batch
    }

    #[tokio::test]
    async fn test_send_batch_releases_on_success() {
        let pools = TelemetryPools::new(&TelemetryConfig::small());
        let mut batch = batch_of(&pools, 3);
        let exporter = TestExporter::new();

        send_batch(&exporter, &mut batch).await.unwrap();

        assert_eq!(batch.count(), 0);
        assert_eq!(exporter.exported(), vec!["trace.span-0", "trace.span-1", "trace.span-2"]);
        assert_eq!(pools.spans.len(), 3);
    }

    #[tokio::test]
    async fn test_send_batch_keeps_batch_on_failure() {
        let pools = TelemetryPools::new(&TelemetryConfig::small());
        let mut batch = batch_of(&pools, 2);
        let exporter = TestExporter::failing(1);

        let err = send_batch(&exporter, &mut batch).await.unwrap_err();
        assert!(matches!(err, ExportError::Transport(_)));
        assert_eq!(batch.count(), 2);
        assert_eq!(batch.records()[1].display_name(), "trace.span-1");
        assert_eq!(pools.spans.len(), 0);

        // Same batch, second attempt
        send_batch(&exporter, &mut batch).await.unwrap();
        assert_eq!(batch.count(), 0);
        assert_eq!(exporter.attempts(), 2);
    }

    #[tokio::test]
    async fn test_null_and_logging_exporters() {
        let pools = TelemetryPools::new(&TelemetryConfig::small());
        let batch = batch_of(&pools, 2);
        assert!(NullExporter::new().export(&batch).await.is_ok());
        assert!(LoggingExporter::new().export(&batch).await.is_ok());
        batch.discard(true);
    }

    #[tokio::test]
    async fn test_boxed_dispatch() {
        let exporters: Vec<Box<dyn SpanExporterBoxed>> =
            vec![Box::new(NullExporter::new()), Box::new(TestExporter::new())];
        let batch = SpanBatch::new();
        for exporter in &exporters {
            assert!(exporter.export_boxed(&batch).await.is_ok());
        }
        assert_eq!(exporters[1].name(), "test");
    }

    #[tokio::test]
    async fn test_json_file_exporter_writes_array() {
        let pools = TelemetryPools::new(&TelemetryConfig::small());
        let batch = batch_of(&pools, 2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spans.json");

        JsonFileExporter::new(&path).export(&batch).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let spans = written.as_array().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0]["traceId"], "trace");
        assert_eq!(spans[1]["intrinsics"]["guid"], "span-1");
    }

    #[tokio::test]
    async fn test_json_file_exporter_reports_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = JsonFileExporter::new(dir.path().join("missing").join("spans.json"));
        let err = exporter.export(&SpanBatch::new()).await.unwrap_err();
        assert!(matches!(err, ExportError::Transport(_)));
    }
}
