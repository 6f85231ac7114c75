//! Per-task retry spacing.
//!
//! An [`AttemptPolicy`] lives for the duration of one worker and is never
//! persisted. Each call to [`AttemptPolicy::next`] grants one more retry
//! until the budget is spent, sleeping just enough to keep consecutive
//! retries at least `interval` apart.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use schedy_core::{Clock, Task};

/// Bounded fixed-interval retry controller.
#[derive(Debug)]
pub struct AttemptPolicy {
    retries: u32,
    interval: Duration,
    count: u32,
    last_attempt: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl AttemptPolicy {
    /// Creates a policy allowing `retries` retries spaced by `interval`.
    pub fn new(retries: u32, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { retries, interval, count: 0, last_attempt: None, clock }
    }

    /// Creates a policy from a task's retry settings.
    pub fn from_task(task: &Task, clock: Arc<dyn Clock>) -> Self {
        Self::new(task.retries, task.retry_interval(), clock)
    }

    /// Waits for and grants the next retry, or returns `false` once the
    /// budget is exhausted.
    ///
    /// The first grant never waits. Later grants sleep only for whatever part
    /// of `interval` has not already elapsed since the previous grant.
    pub async fn next(&mut self) -> bool {
        if self.count >= self.retries {
            return false;
        }

        if let Some(last) = self.last_attempt {
            let elapsed = self.clock.now().saturating_duration_since(last);
            if let Some(remaining) = self.interval.checked_sub(elapsed).filter(|d| !d.is_zero()) {
                self.clock.sleep(remaining).await;
            }
        }

        self.last_attempt = Some(self.clock.now());
        self.count += 1;
        true
    }

    /// Retries granted so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Maximum retries.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Minimum spacing between retries.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
