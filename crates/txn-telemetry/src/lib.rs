//! Transaction Telemetry - Concurrent Capture and Pooled Span Batching
//!
//! The capture core of a request-tracing agent. Two independent halves:
//!
//! - **Per transaction**: [`RequestMetadata`] is written concurrently by the
//!   handler thread and instrumentation callbacks (URIs, status codes,
//!   cross-application hashes, distributed-trace ids, user attributes,
//!   errors), then frozen into an immutable [`MetadataSnapshot`].
//! - **Per span**: an [`AttributeCollection`] fills a pooled [`SpanRecord`]
//!   with pooled, reference-counted [`PooledAttribute`]s. Records are grouped
//!   into [`SpanBatch`]es and go back to their pools only after a confirmed
//!   successful export.
//!
//! # Span Record Lifecycle
//!
//! ```text
//! Leased ──set()──► Populated ──batch.add()──► Batched ──success──► Sent (pooled)
//!                                                 │
//!                                                 └──failure──► Retry (untouched)
//! ```
//!
//! Pools are injected through [`TelemetryPools`] and tuned by an explicit
//! [`PoolMaintainer`](adaptive_pool::PoolMaintainer); there is no global state.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use txn_telemetry::{AttributeCollection, AttributeDefinition, TelemetryConfig, TelemetryPools};
//!
//! let pools = TelemetryPools::new(&TelemetryConfig::small());
//! let collection = AttributeCollection::new(Arc::clone(&pools));
//!
//! collection.set(&AttributeDefinition::trace_id(), "4bf92f35");
//! collection.set(&AttributeDefinition::guid(), "00f067aa");
//! collection.set(&Arc::new(AttributeDefinition::user("plan")), "gold");
//!
//! let record = collection.into_record().unwrap();
//! assert_eq!(record.display_name(), "4bf92f35.00f067aa");
//! ```

pub mod batch_processor;
pub mod collection;
pub mod config;
pub mod definition;
pub mod error_data;
pub mod exporter;
mod invariants;
pub mod metadata;
pub mod pooled_attribute;
pub mod pools;
pub mod resilient_exporter;
pub mod sampler;
pub mod snapshot;
pub mod span;
pub mod transport;
pub mod value;

// Re-export main types
pub use batch_processor::{BatchMetrics, SpanBatcher};
pub use collection::AttributeCollection;
pub use config::{
    BatchConfig, MetadataLimits, TelemetryConfig, ALTERNATE_PATH_HASH_MAX_SIZE,
    USER_ATTRIBUTE_CLAMP,
};
pub use definition::{AttributeClassification, AttributeDefinition, KEY_GUID, KEY_TRACE_ID};
pub use error_data::ErrorData;
pub use exporter::{
    send_batch, ExportError, ExportFuture, JsonFileExporter, LoggingExporter, NullExporter,
    SpanExporter, SpanExporterBoxed,
};
pub use metadata::RequestMetadata;
pub use pooled_attribute::{AttributePool, PooledAttribute};
pub use pools::TelemetryPools;
pub use resilient_exporter::{RetryConfig, RetryingExporter};
pub use sampler::{AdaptiveSampler, ConstantSampler};
pub use snapshot::MetadataSnapshot;
pub use span::{SpanBatch, SpanIdentity, SpanRecord, SpanRecordPool};
pub use transport::TransportType;
pub use value::{AttributeValue, LazyValue};
