use super::job::BoxedJob;
use super::pool::{PoolClass, PoolStats, WorkerPool};
use crate::config::Config;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Owns the background and interactive pools.
///
/// Each pool is created on first use under its slot lock, so concurrent
/// first submissions still create exactly one pool. [`reset_all`] empties
/// both slots; the next submission builds a fresh pool.
///
/// [`reset_all`]: WorkerPoolRegistry::reset_all
#[derive(Debug)]
pub struct WorkerPoolRegistry {
    config: Arc<Config>,
    background: Mutex<Option<Arc<WorkerPool>>>,
    interactive: Mutex<Option<Arc<WorkerPool>>>,
}

impl WorkerPoolRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            background: Mutex::new(None),
            interactive: Mutex::new(None),
        }
    }

    fn slot(&self, class: PoolClass) -> &Mutex<Option<Arc<WorkerPool>>> {
        match class {
            PoolClass::Background => &self.background,
            PoolClass::Interactive => &self.interactive,
        }
    }

    /// Returns the pool for `class`, creating it if needed.
    pub fn pool(&self, class: PoolClass) -> Arc<WorkerPool> {
        let mut slot = self.slot(class).lock();
        if let Some(pool) = slot.as_ref() {
            return pool.clone();
        }

        let pool_config = self.config.pool(class).clone();
        info!(
            pool = %class,
            min = pool_config.min_workers,
            max = pool_config.max_workers,
            "creating worker pool"
        );
        let pool = Arc::new(WorkerPool::new(
            class,
            pool_config,
            self.config.overload_policy,
            self.config.debug,
            self.config.stack_size,
            &self.config.thread_name_prefix,
        ));
        *slot = Some(pool.clone());
        pool
    }

    pub fn submit(&self, class: PoolClass, job: BoxedJob) -> Result<()> {
        self.pool(class).execute(job)
    }

    /// Shuts down both pools, discarding queued work. Returns the number of
    /// discarded jobs.
    pub fn reset_all(&self) -> usize {
        let pools: Vec<Arc<WorkerPool>> = [PoolClass::Background, PoolClass::Interactive]
            .into_iter()
            .filter_map(|class| self.slot(class).lock().take())
            .collect();

        let discarded = pools.iter().map(|pool| pool.shutdown_now()).sum();
        info!(discarded, "worker pools reset");
        discarded
    }

    /// Stats for a pool that currently exists.
    pub fn stats(&self, class: PoolClass) -> Option<PoolStats> {
        self.slot(class).lock().as_ref().map(|pool| pool.stats())
    }

    /// Resets both pools and waits up to `timeout` for their workers to exit.
    pub(crate) fn shutdown(&self, timeout: Duration) -> bool {
        let pools: Vec<Arc<WorkerPool>> = [PoolClass::Background, PoolClass::Interactive]
            .into_iter()
            .filter_map(|class| self.slot(class).lock().take())
            .collect();

        for pool in &pools {
            pool.shutdown_now();
        }
        pools.iter().all(|pool| pool.await_termination(timeout))
    }
}
