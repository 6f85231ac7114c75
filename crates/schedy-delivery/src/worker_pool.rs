//! Bounded fan-out of due tasks to workers.
//!
//! Every submitted task gets its own tokio task so fire-time timers run
//! independently, but actual delivery attempts share a fixed number of
//! semaphore permits. Tasks beyond the limit queue on the semaphore.

use std::{sync::Arc, time::Duration};

use schedy_core::{Clock, Task, TaskStore};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::{
    client::Executor,
    worker::{DeliveryWorker, DispatchStats, WorkerOutcome},
};

/// Spawns and tracks per-task workers.
#[derive(Clone)]
pub struct WorkerPool {
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    stats: Arc<RwLock<DispatchStats>>,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Creates a pool allowing `max_concurrent` simultaneous deliveries.
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn Executor>,
        clock: Arc<dyn Clock>,
        max_concurrent: usize,
        stats: Arc<RwLock<DispatchStats>>,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            stats,
            tracker: TaskTracker::new(),
        }
    }

    /// Hands a task to a new worker and returns immediately.
    pub async fn submit(&self, task: Task) -> tokio::task::JoinHandle<WorkerOutcome> {
        {
            let mut stats = self.stats.write().await;
            stats.tasks_dispatched += 1;
            stats.in_flight += 1;
        }

        let worker = DeliveryWorker {
            store: self.store.clone(),
            executor: self.executor.clone(),
            clock: self.clock.clone(),
            permits: self.permits.clone(),
            stats: self.stats.clone(),
        };
        self.tracker.spawn(worker.run(task))
    }

    /// Number of workers that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops handing out delivery permits.
    ///
    /// Attempts already running finish; every worker that has yet to start
    /// an attempt ends with [`WorkerOutcome::Aborted`] and leaves its task in
    /// the store.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Waits up to `timeout` for every running worker to finish.
    ///
    /// Returns `true` if the pool drained in time. Workers still running
    /// after the timeout are left alone.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let pending = self.tracker.len();
        if pending == 0 {
            return true;
        }

        info!(pending, timeout_ms = timeout.as_millis(), "waiting for workers to finish");
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        self.tracker.reopen();

        if !drained {
            warn!(remaining = self.tracker.len(), "workers still running after grace period");
        }
        drained
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("in_flight", &self.tracker.len())
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}
