//! Background capacity maintenance.
//!
//! Pools never tune themselves. A [`PoolMaintainer`] owns the list of pools
//! to tick and is started explicitly, yielding a [`MaintenanceHandle`] whose
//! lifetime is tied to whoever started it (typically process bootstrap).
//! Tests can skip the task entirely and call [`PoolMaintainer::tick`], or run
//! the task under a paused tokio clock.

use crate::metrics::CapacityUpdate;
use crate::pool::{AdaptivePool, Poolable};
use crate::MaintenanceConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Errors from the maintenance task lifecycle.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    /// The background task panicked or was aborted.
    #[error("maintenance task failed: {0}")]
    TaskFailed(String),
}

/// Anything that needs a periodic maintenance tick.
pub trait Maintainable: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Runs one maintenance step.
    fn run_maintenance(&self) -> CapacityUpdate;
}

impl<T> Maintainable for AdaptivePool<T>
where
    T: Poolable + Send,
{
    fn name(&self) -> &str {
        AdaptivePool::name(self)
    }

    fn run_maintenance(&self) -> CapacityUpdate {
        self.update_capacity()
    }
}

/// Set of pools ticked together on one schedule.
pub struct PoolMaintainer {
    pools: Vec<Arc<dyn Maintainable>>,
    config: MaintenanceConfig,
}

impl PoolMaintainer {
    /// Creates an empty maintainer.
    pub fn new(config: MaintenanceConfig) -> Self {
        Self {
            pools: Vec::new(),
            config,
        }
    }

    /// Adds a pool to the tick set.
    pub fn register(&mut self, pool: Arc<dyn Maintainable>) -> &mut Self {
        self.pools.push(pool);
        self
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Returns `true` if no pools are registered.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Returns the schedule.
    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Ticks every registered pool once, in registration order.
    pub fn tick(&self) -> Vec<CapacityUpdate> {
        self.pools.iter().map(|pool| pool.run_maintenance()).collect()
    }

    /// Starts the background task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime; use [`start_on`](Self::start_on)
    /// to pass a handle explicitly.
    pub fn start(self) -> MaintenanceHandle {
        self.start_on(&Handle::current())
    }

    /// Starts the background task on the given runtime.
    pub fn start_on(self, runtime: &Handle) -> MaintenanceHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ticks = Arc::new(AtomicU64::new(0));
        let task = runtime.spawn(run_maintenance_loop(self, shutdown_rx, Arc::clone(&ticks)));

        MaintenanceHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            ticks,
        }
    }
}

async fn run_maintenance_loop(
    maintainer: PoolMaintainer,
    mut shutdown: oneshot::Receiver<()>,
    ticks: Arc<AtomicU64>,
) {
    let start = Instant::now() + maintainer.config.first_tick;
    let mut interval = interval_at(start, maintainer.config.interval);
    // A stalled runtime should not produce a burst of catch-up ticks
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(pools = maintainer.len(), "pool maintenance started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                maintainer.tick();
                ticks.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    tracing::debug!(
        ticks = ticks.load(Ordering::Relaxed),
        "pool maintenance stopped"
    );
}

/// Handle to a running maintenance task.
///
/// Dropping the handle signals the task to exit; [`stop`](Self::stop) also
/// waits for it.
pub struct MaintenanceHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
}

impl MaintenanceHandle {
    /// Number of ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Returns `true` while the task has not finished.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signals the task to exit and waits for it.
    pub async fn stop(mut self) -> Result<(), MaintenanceError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already be gone; that is the state we want anyway
            let _ = tx.send(());
        }

        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| MaintenanceError::TaskFailed(e.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
