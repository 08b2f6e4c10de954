//! Adaptive Pool - Self-Tuning Thread-Safe Object Pool
//!
//! An object pool for hot-path allocations (span records, attribute slots)
//! whose capacity follows recent demand instead of a fixed bound.
//!
//! # Key Features
//!
//! - `take()` never fails: an empty pool falls back to the factory (a "miss")
//! - `put()` rejects double returns of shared items via a per-item [`PoolFlag`]
//! - Storage is touched only inside one short `parking_lot` critical section
//! - Cache-padded statistical counters (takes, misses, returns, overflow)
//! - Periodic smoothing: `capacity = (capacity + takes) / 2`, then reclaim of
//!   surplus items once storage exceeds 1.2x the new capacity
//! - Maintenance is an explicit, injectable component ([`PoolMaintainer`])
//!   rather than a hidden global timer
//!
//! # Example
//!
//! ```
//! use adaptive_pool::{AdaptivePool, PoolFlag, Poolable};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Buffer {
//!     bytes: Vec<u8>,
//!     flag: PoolFlag,
//! }
//!
//! impl Poolable for Buffer {
//!     fn pool_flag(&self) -> &PoolFlag {
//!         &self.flag
//!     }
//! }
//!
//! let pool = AdaptivePool::new(16, || Arc::new(Buffer::default()));
//!
//! let buffer = pool.take();
//! assert!(pool.give_back(Arc::clone(&buffer)));
//!
//! // A second return of the same instance is rejected
//! assert!(!pool.give_back(buffer));
//!
//! // One maintenance step: capacity moves halfway toward observed demand
//! let update = pool.update_capacity();
//! assert_eq!(update.new_capacity, (16 + 1) / 2);
//! ```

mod config;
mod invariants;
mod maintenance;
mod metrics;
mod pool;

pub use config::{MaintenanceConfig, PoolConfig, DEFAULT_POOL_CONFIG, SMALL_POOL_CONFIG};
pub use maintenance::{Maintainable, MaintenanceError, MaintenanceHandle, PoolMaintainer};
pub use metrics::{CapacityUpdate, PoolStats, WindowCounts};
pub use pool::{smoothed_capacity, AdaptivePool, PoolFlag, Poolable, ReturnError};
