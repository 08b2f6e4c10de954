use std::time::Duration;

/// Configuration for an [`AdaptivePool`](crate::AdaptivePool).
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Capacity the pool starts with before the first maintenance tick
    pub initial_capacity: usize,
    /// Reclaim only once the stored count exceeds `capacity * reclaim_threshold`
    pub reclaim_threshold: f64,
}

impl PoolConfig {
    /// Creates a new configuration with custom settings.
    pub const fn new(initial_capacity: usize, reclaim_threshold: f64) -> Self {
        Self {
            initial_capacity,
            reclaim_threshold,
        }
    }

    /// Sets the initial capacity.
    pub const fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Sets the reclaim threshold (clamped to at least 1.0 when applied).
    pub const fn with_reclaim_threshold(mut self, reclaim_threshold: f64) -> Self {
        self.reclaim_threshold = reclaim_threshold;
        self
    }

    /// Upper bound on the stored count before a tick starts discarding items.
    #[inline]
    pub fn reclaim_limit(&self, capacity: usize) -> f64 {
        capacity as f64 * self.reclaim_threshold.max(1.0)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        DEFAULT_POOL_CONFIG
    }
}

/// 100 pooled items to start, reclaim at 20% over target
pub const DEFAULT_POOL_CONFIG: PoolConfig = PoolConfig::new(100, 1.2);

/// Small pool for tests and low-volume services
pub const SMALL_POOL_CONFIG: PoolConfig = PoolConfig::new(8, 1.2);

/// Schedule for the background capacity maintenance task.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceConfig {
    /// Delay before the first tick after `start`
    pub first_tick: Duration,
    /// Period between subsequent ticks
    pub interval: Duration,
}

impl MaintenanceConfig {
    /// Creates a schedule with custom settings.
    pub const fn new(first_tick: Duration, interval: Duration) -> Self {
        Self {
            first_tick,
            interval,
        }
    }

    /// Sets the delay before the first tick.
    pub const fn with_first_tick(mut self, first_tick: Duration) -> Self {
        self.first_tick = first_tick;
        self
    }

    /// Sets the tick period.
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            first_tick: Duration::from_secs(5),
            interval: Duration::from_secs(30),
        }
    }
}
