use crate::config::TelemetryConfig;
use crate::pooled_attribute::{attribute_pool, AttributePool};
use crate::span::{span_record_pool, SpanRecordPool};
use adaptive_pool::{MaintenanceConfig, PoolMaintainer, PoolStats};
use std::sync::Arc;

/// The two pools behind the span attribute model.
///
/// Created once at startup and passed to every
/// [`AttributeCollection`](crate::AttributeCollection).
#[derive(Debug)]
pub struct TelemetryPools {
    pub attributes: Arc<AttributePool>,
    pub spans: Arc<SpanRecordPool>,
}

impl TelemetryPools {
    pub fn new(config: &TelemetryConfig) -> Arc<Self> {
        Arc::new(Self {
            attributes: Arc::new(attribute_pool(config.attribute_pool)),
            spans: Arc::new(span_record_pool(config.span_pool)),
        })
    }

    /// A maintainer with both pools registered, ready to `start`.
    pub fn maintainer(&self, config: MaintenanceConfig) -> PoolMaintainer {
        let mut maintainer = PoolMaintainer::new(config);
        maintainer
            .register(Arc::clone(&self.attributes) as _)
            .register(Arc::clone(&self.spans) as _);
        maintainer
    }

    /// Current statistics: (attribute pool, span pool).
    pub fn stats(&self) -> (PoolStats, PoolStats) {
        (self.attributes.stats(), self.spans.stats())
    }
}
