//! Lifecycle of a single due task.
//!
//! A [`DeliveryWorker`] owns one task from dispatch until it is delivered or
//! its retry budget runs out: wait for the fire time, attempt delivery under
//! a concurrency permit, delete on success, retry on failure. Workers do not
//! observe the dispatcher's cancellation; they only stop early when the pool
//! is closed, and then the task stays persisted.

use std::{sync::Arc, time::Duration};

use schedy_core::{Clock, Task, TaskStore};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{attempt::AttemptPolicy, client::Executor, error::ErrorCategory};

/// Counters for dispatcher monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Poll ticks that queried the store.
    pub polls: u64,
    /// Polls that failed with a storage error.
    pub poll_failures: u64,
    /// Tasks handed to workers.
    pub tasks_dispatched: u64,
    /// Delivery attempts made, including retries.
    pub delivery_attempts: u64,
    /// Tasks delivered successfully.
    pub deliveries_succeeded: u64,
    /// Tasks left in the store after exhausting retries.
    pub tasks_abandoned: u64,
    /// Tasks currently held by workers.
    pub in_flight: u64,
}

/// Terminal state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Delivered and removed from the store.
    Delivered,
    /// Every attempt failed; the task stays persisted.
    Exhausted,
    /// The pool was closed before the next attempt; the task stays
    /// persisted.
    Aborted,
}

/// Handles one task from wake-up to completion.
pub(crate) struct DeliveryWorker {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) stats: Arc<RwLock<DispatchStats>>,
}

impl DeliveryWorker {
    /// Runs the task to a terminal state.
    pub(crate) async fn run(self, task: Task) -> WorkerOutcome {
        let span = info_span!("task_worker", task_id = %task.id, url = %task.url);

        async move {
            let wait = (task.execute_at - self.clock.now_utc()).to_std().unwrap_or(Duration::ZERO);
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis(), "waiting for fire time");
                self.clock.sleep(wait).await;
            }

            let outcome = self.deliver_with_retries(&task).await;

            let mut stats = self.stats.write().await;
            stats.in_flight = stats.in_flight.saturating_sub(1);
            match outcome {
                WorkerOutcome::Delivered => stats.deliveries_succeeded += 1,
                WorkerOutcome::Exhausted => stats.tasks_abandoned += 1,
                WorkerOutcome::Aborted => {},
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn deliver_with_retries(&self, task: &Task) -> WorkerOutcome {
        let mut policy = AttemptPolicy::from_task(task, self.clock.clone());

        loop {
            let attempt = policy.count() + 1;
            let result = {
                let Ok(_permit) = self.permits.acquire().await else {
                    warn!(attempt, "worker pool closed, task left in store");
                    return WorkerOutcome::Aborted;
                };
                self.stats.write().await.delivery_attempts += 1;
                self.executor.execute(task).await
            };

            match result {
                Ok(outcome) => {
                    info!(attempt, status = outcome.status_code, "task delivered");
                    if let Err(e) = self.store.delete(&task.id, task.execute_at_secs()).await {
                        error!(error = %e, "failed to delete delivered task");
                    }
                    return WorkerOutcome::Delivered;
                },
                Err(e) => {
                    warn!(
                        attempt,
                        category = %ErrorCategory::from(&e),
                        error = %e,
                        "delivery attempt failed"
                    );
                    if policy.next().await {
                        info!(retry = policy.count(), retries = policy.retries(), "retrying task");
                        continue;
                    }
                    warn!(attempts = attempt, "retries exhausted, task left in store");
                    return WorkerOutcome::Exhausted;
                },
            }
        }
    }
}
