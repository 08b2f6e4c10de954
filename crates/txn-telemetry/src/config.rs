use adaptive_pool::{MaintenanceConfig, PoolConfig, DEFAULT_POOL_CONFIG, SMALL_POOL_CONFIG};
use std::time::Duration;

/// Maximum number of user attributes one transaction may carry.
pub const USER_ATTRIBUTE_CLAMP: usize = 64;

/// Maximum number of alternate cross-application path hashes in a snapshot.
pub const ALTERNATE_PATH_HASH_MAX_SIZE: usize = 10;

/// Size limits for [`RequestMetadata`](crate::RequestMetadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataLimits {
    /// Writes past this many distinct user attributes are dropped
    pub user_attribute_clamp: usize,
    /// Alternate path hashes kept by `freeze`
    pub alternate_path_hash_max: usize,
}

impl MetadataLimits {
    pub const fn new(user_attribute_clamp: usize, alternate_path_hash_max: usize) -> Self {
        Self {
            user_attribute_clamp,
            alternate_path_hash_max,
        }
    }
}

impl Default for MetadataLimits {
    fn default() -> Self {
        Self::new(USER_ATTRIBUTE_CLAMP, ALTERNATE_PATH_HASH_MAX_SIZE)
    }
}

/// Size and time triggers for [`SpanBatcher`](crate::SpanBatcher).
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush once this many records are pending
    pub batch_size_limit: usize,
    /// Flush once this long has passed since the last flush
    pub batch_timeout: Duration,
    /// Failed batches kept for retry; beyond this the oldest are dropped
    /// and their records released
    pub max_retry_batches: usize,
}

impl BatchConfig {
    pub fn with_batch_size_limit(mut self, batch_size_limit: usize) -> Self {
        self.batch_size_limit = batch_size_limit;
        self
    }

    pub fn with_batch_timeout(mut self, batch_timeout: Duration) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn with_max_retry_batches(mut self, max_retry_batches: usize) -> Self {
        self.max_retry_batches = max_retry_batches;
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size_limit: 1_000,
            batch_timeout: Duration::from_secs(5),
            max_retry_batches: 16,
        }
    }
}

/// Everything needed to stand up the telemetry core.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub attribute_pool: PoolConfig,
    pub span_pool: PoolConfig,
    pub maintenance: MaintenanceConfig,
    pub metadata: MetadataLimits,
    pub batch: BatchConfig,
}

impl TelemetryConfig {
    /// Production defaults: 100-item pools, 64 user attributes.
    pub fn new() -> Self {
        Self {
            attribute_pool: DEFAULT_POOL_CONFIG,
            span_pool: DEFAULT_POOL_CONFIG,
            ..Self::default()
        }
    }

    /// Small pools for tests and low-volume services.
    pub fn small() -> Self {
        Self {
            attribute_pool: SMALL_POOL_CONFIG,
            span_pool: SMALL_POOL_CONFIG,
            ..Self::default()
        }
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataLimits) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }
}
