//! Polling dispatch loop.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐ tick ┌───────────┐ due tasks ┌─────────────┐ POST ┌──────────┐
//! │ Dispatcher │─────▶│ TaskStore │──────────▶│ WorkerPool  │─────▶│ Endpoint │
//! └────────────┘      └───────────┘           └─────────────┘      └──────────┘
//!                           ▲        delete on success │
//!                           └──────────────────────────┘
//! ```
//!
//! Each tick polls the whole seconds `[cursor, floor(now + tick_interval) + 1)`,
//! so every task due before the next tick is picked up, including tasks due
//! later in the current second. After a successful poll `cursor` moves to
//! `floor(now)`: seconds that have fully elapsed are never polled again, while
//! the current second is polled again by the next tick so tasks created during
//! it are not missed. Tasks already handed to a worker are remembered until
//! their second leaves the window, so the overlap never dispatches a task
//! twice. A failed poll leaves the cursor in place.
//!
//! The first window starts at the epoch unless a start-up lookback is
//! configured, so tasks left behind by a previous run are delivered again.
//! Cancellation stops the loop only; workers already dispatched run to
//! completion.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use schedy_core::{unix_secs, Clock, TaskId, TaskStore};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::Executor,
    error::{DeliveryError, Result},
    worker::DispatchStats,
    worker_pool::WorkerPool,
};

/// Configuration for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Pause between polls; also the look-ahead of each poll window.
    ///
    /// A task is handed to a worker by the first poll after it was saved
    /// whose look-ahead reaches its fire time, so a task saved while the
    /// dispatcher is running may start up to one interval late.
    pub tick_interval: Duration,

    /// Maximum deliveries in progress at once.
    pub max_concurrent_deliveries: usize,

    /// How far before start-up the first window begins. `None` covers every
    /// stored task that is already overdue.
    pub startup_lookback: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(crate::DEFAULT_TICK_INTERVAL_SECONDS),
            max_concurrent_deliveries: crate::DEFAULT_MAX_CONCURRENT_DELIVERIES,
            startup_lookback: None,
        }
    }
}

impl DispatchConfig {
    /// Checks the configuration for values the loop cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for a zero tick interval or zero
    /// concurrency.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(DeliveryError::configuration("tick interval must be positive"));
        }
        if self.max_concurrent_deliveries == 0 {
            return Err(DeliveryError::configuration(
                "max concurrent deliveries must be positive",
            ));
        }
        Ok(())
    }
}

/// Owns the dispatch loop and its worker pool.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    pool: WorkerPool,
    stats: Arc<RwLock<DispatchStats>>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Creates a dispatcher; nothing runs until [`Dispatcher::start`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if `config` is invalid.
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn Executor>,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(RwLock::new(DispatchStats::default()));
        let pool = WorkerPool::new(
            store.clone(),
            executor,
            clock.clone(),
            config.max_concurrent_deliveries,
            stats.clone(),
        );

        Ok(Self {
            store,
            config,
            clock,
            pool,
            stats,
            cancellation_token: CancellationToken::new(),
            handle: None,
        })
    }

    /// Spawns the tick loop. The first tick runs immediately and the loop
    /// then sleeps `tick_interval` on the injected clock between ticks.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the dispatcher is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(DeliveryError::configuration("dispatcher already started"));
        }

        info!(
            tick_interval_ms = self.config.tick_interval.as_millis(),
            max_concurrent_deliveries = self.config.max_concurrent_deliveries,
            startup_lookback_secs = self.config.startup_lookback.map(|d| d.as_secs()),
            "starting dispatcher"
        );

        let mut dispatch_loop = DispatchLoop::new(
            self.store.clone(),
            self.pool.clone(),
            self.clock.clone(),
            self.stats.clone(),
            &self.config,
        );
        let clock = self.clock.clone();
        let token = self.cancellation_token.clone();
        let tick_interval = self.config.tick_interval;

        self.handle = Some(tokio::spawn(async move {
            while !token.is_cancelled() {
                dispatch_loop.tick().await;

                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = clock.sleep(tick_interval) => {},
                }
            }
            info!("dispatcher stopped");
        }));

        Ok(())
    }

    /// Token that stops the tick loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Returns current dispatch statistics.
    pub async fn stats(&self) -> DispatchStats {
        self.stats.read().await.clone()
    }

    /// Stops ticking, then gives in-flight workers up to `grace` to finish.
    ///
    /// When the grace period runs out the pool is closed: attempts already
    /// running finish, every other worker gives up and its task stays in the
    /// store for the next run. Returns `true` if every worker finished in
    /// time.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        info!("shutting down dispatcher");
        self.cancellation_token.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "dispatch loop panicked");
            }
        }

        let drained = self.pool.wait_idle(grace).await;
        if !drained {
            warn!(remaining = self.pool.in_flight(), "closing worker pool");
            self.pool.close();
        }
        drained
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// State carried between ticks.
struct DispatchLoop {
    store: Arc<dyn TaskStore>,
    pool: WorkerPool,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<DispatchStats>>,
    tick_interval: Duration,
    cursor: u64,
    // (execute_at secs, id) of tasks handed out whose second may be polled again
    dispatched: BTreeSet<(u64, TaskId)>,
}

impl DispatchLoop {
    fn new(
        store: Arc<dyn TaskStore>,
        pool: WorkerPool,
        clock: Arc<dyn Clock>,
        stats: Arc<RwLock<DispatchStats>>,
        config: &DispatchConfig,
    ) -> Self {
        let cursor = match config.startup_lookback {
            Some(lookback) => unix_secs(clock.now_utc()).saturating_sub(lookback.as_secs()),
            None => 0,
        };
        Self {
            store,
            pool,
            clock,
            stats,
            tick_interval: config.tick_interval,
            cursor,
            dispatched: BTreeSet::new(),
        }
    }

    /// Polls the next window and hands new due tasks to the pool.
    async fn tick(&mut self) {
        let now = self.clock.now_utc();
        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let tick_ms = u64::try_from(self.tick_interval.as_millis()).unwrap_or(u64::MAX);
        let end = now_ms.saturating_add(tick_ms) / 1000 + 1;
        let start = self.cursor;

        if end <= start {
            debug!(window_start = start, window_end = end, "empty poll window, skipping");
            return;
        }

        self.stats.write().await.polls += 1;

        let tasks = match self.store.get_due_tasks(second_start(start), second_start(end)).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(
                    window_start = start,
                    window_end = end,
                    error = %e,
                    "failed to get due tasks"
                );
                self.stats.write().await.poll_failures += 1;
                return;
            },
        };

        debug!(window_start = start, window_end = end, due = tasks.len(), "polled window");

        // Seconds before `start` can no longer come back from a poll.
        self.dispatched = self.dispatched.split_off(&(start, TaskId(String::new())));

        for task in tasks {
            if !self.dispatched.insert((task.execute_at_secs(), task.id.clone())) {
                continue;
            }
            info!(task_id = %task.id, execute_at = %task.execute_at, "dispatching task");
            self.pool.submit(task).await;
        }

        self.cursor = self.cursor.max(unix_secs(now));
    }
}

fn second_start(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::UNIX_EPOCH};

    use schedy_core::{storage::StoreFuture, CoreError, InMemoryTaskStore, Task, TaskFilter, TestClock};

    use super::*;
    use crate::client::{DeliveryOutcome, ExecuteFuture};

    const T0: u64 = 1_700_000_000;

    /// Store that records poll windows and can fail the first polls.
    struct RecordingStore {
        inner: InMemoryTaskStore,
        windows: Mutex<Vec<(i64, i64)>>,
        failures_left: Mutex<u32>,
    }

    impl RecordingStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryTaskStore::new(),
                windows: Mutex::new(Vec::new()),
                failures_left: Mutex::new(failures),
            }
        }

        fn windows(&self) -> Vec<(i64, i64)> {
            let base = i64::try_from(T0).unwrap();
            self.windows.lock().unwrap().iter().map(|(s, e)| (s - base, e - base)).collect()
        }
    }

    impl TaskStore for RecordingStore {
        fn save(&self, task: &Task) -> StoreFuture<'_, ()> {
            self.inner.save(task)
        }

        fn get_task<'a>(&'a self, id: &'a TaskId) -> StoreFuture<'a, Option<Task>> {
            self.inner.get_task(id)
        }

        fn list_tasks(&self) -> StoreFuture<'_, Vec<Task>> {
            self.inner.list_tasks()
        }

        fn get_due_tasks(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> StoreFuture<'_, Vec<Task>> {
            self.windows.lock().unwrap().push((start.timestamp(), end.timestamp()));
            let fail = {
                let mut left = self.failures_left.lock().unwrap();
                let fail = *left > 0;
                *left = left.saturating_sub(1);
                fail
            };
            if fail {
                return Box::pin(async { Err(CoreError::Database("disk unavailable".into())) });
            }
            self.inner.get_due_tasks(start, end)
        }

        fn delete<'a>(&'a self, id: &'a TaskId, execute_at_secs: u64) -> StoreFuture<'a, ()> {
            self.inner.delete(id, execute_at_secs)
        }

        fn delete_tasks<'a>(&'a self, filter: &'a TaskFilter) -> StoreFuture<'a, usize> {
            self.inner.delete_tasks(filter)
        }

        fn health_check(&self) -> StoreFuture<'_, ()> {
            self.inner.health_check()
        }
    }

    struct AcceptAll;

    impl Executor for AcceptAll {
        fn execute<'a>(&'a self, _task: &'a Task) -> ExecuteFuture<'a> {
            Box::pin(async {
                Ok(DeliveryOutcome { status_code: 200, body: String::new(), duration: Duration::ZERO })
            })
        }
    }

    struct RejectAll;

    impl Executor for RejectAll {
        fn execute<'a>(&'a self, _task: &'a Task) -> ExecuteFuture<'a> {
            Box::pin(async { Err(DeliveryError::unexpected_status(500, "")) })
        }
    }

    fn clock_at(secs: u64, millis: u64) -> TestClock {
        TestClock::with_start_time(
            UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_millis(millis),
        )
    }

    fn at(secs: u64) -> DateTime<Utc> {
        DateTime::<Utc>::from(UNIX_EPOCH + Duration::from_secs(secs))
    }

    fn dispatch_loop_with(
        store: Arc<RecordingStore>,
        executor: Arc<dyn Executor>,
        clock: &TestClock,
        tick: Duration,
        lookback: Option<Duration>,
    ) -> DispatchLoop {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let stats = Arc::new(RwLock::new(DispatchStats::default()));
        let pool = WorkerPool::new(store.clone(), executor, clock.clone(), 4, stats.clone());
        let config = DispatchConfig {
            tick_interval: tick,
            max_concurrent_deliveries: 4,
            startup_lookback: lookback,
        };
        DispatchLoop::new(store, pool, clock, stats, &config)
    }

    fn dispatch_loop(
        store: Arc<RecordingStore>,
        clock: &TestClock,
        tick: Duration,
        lookback: Option<Duration>,
    ) -> DispatchLoop {
        dispatch_loop_with(store, Arc::new(AcceptAll), clock, tick, lookback)
    }

    #[tokio::test]
    async fn windows_reach_past_the_next_tick_and_drop_elapsed_seconds() {
        let store = Arc::new(RecordingStore::new(0));
        let clock = clock_at(T0, 0);
        let mut dl = dispatch_loop(store.clone(), &clock, Duration::from_secs(10), Some(Duration::ZERO));

        dl.tick().await;
        clock.advance(Duration::from_secs(10));
        dl.tick().await;
        clock.advance(Duration::from_secs(13));
        dl.tick().await;

        assert_eq!(store.windows(), vec![(0, 11), (0, 21), (10, 34)]);
    }

    #[tokio::test]
    async fn sub_second_ticks_repoll_the_current_second() {
        let store = Arc::new(RecordingStore::new(0));
        let clock = clock_at(T0, 500);
        let mut dl = dispatch_loop(store.clone(), &clock, Duration::from_millis(300), Some(Duration::ZERO));

        dl.tick().await;
        clock.advance(Duration::from_millis(300));
        dl.tick().await;
        clock.advance(Duration::from_millis(300));
        dl.tick().await;

        assert_eq!(store.windows(), vec![(0, 1), (0, 2), (0, 2)]);
        assert_eq!(dl.stats.read().await.polls, 3);
    }

    #[tokio::test]
    async fn task_saved_after_its_second_was_polled_is_dispatched() {
        let store = Arc::new(RecordingStore::new(0));
        let clock = clock_at(T0, 100);
        let mut dl = dispatch_loop(store.clone(), &clock, Duration::from_millis(200), Some(Duration::ZERO));

        dl.tick().await;
        let late = Task::new("http://x", at(T0) + chrono::Duration::milliseconds(600));
        store.save(&late).await.unwrap();
        clock.advance(Duration::from_millis(200));
        dl.tick().await;

        assert!(dl.pool.wait_idle(Duration::from_secs(5)).await);
        assert!(store.get_task(&late.id).await.unwrap().is_none());
        assert_eq!(dl.stats.read().await.tasks_dispatched, 1);
    }

    #[tokio::test]
    async fn overlapping_polls_dispatch_a_task_once() {
        let store = Arc::new(RecordingStore::new(0));
        let clock = clock_at(T0, 0);
        let stuck = Task::new("http://x", at(T0 + 8));
        store.save(&stuck).await.unwrap();
        let mut dl = dispatch_loop_with(
            store.clone(),
            Arc::new(RejectAll),
            &clock,
            Duration::from_secs(10),
            Some(Duration::ZERO),
        );

        dl.tick().await;
        assert!(dl.pool.wait_idle(Duration::from_secs(5)).await);
        dl.tick().await;
        clock.advance(Duration::from_secs(1));
        dl.tick().await;

        assert!(dl.pool.wait_idle(Duration::from_secs(5)).await);
        let stats = dl.stats.read().await.clone();
        assert_eq!(stats.tasks_dispatched, 1);
        assert_eq!(stats.tasks_abandoned, 1);
        assert!(store.get_task(&stuck.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clock_going_backwards_skips_poll() {
        let store = Arc::new(RecordingStore::new(0));
        let clock = clock_at(T0 + 10, 0);
        let mut dl = dispatch_loop(store.clone(), &clock, Duration::from_secs(1), Some(Duration::ZERO));

        dl.tick().await;
        clock.jump_to(UNIX_EPOCH + Duration::from_secs(T0));
        dl.tick().await;

        assert_eq!(store.windows(), vec![(10, 12)]);
        assert_eq!(dl.stats.read().await.polls, 1);
    }

    #[tokio::test]
    async fn failed_poll_keeps_cursor() {
        let store = Arc::new(RecordingStore::new(1));
        let clock = clock_at(T0, 0);
        let mut dl = dispatch_loop(store.clone(), &clock, Duration::from_secs(10), Some(Duration::ZERO));

        dl.tick().await;
        clock.advance(Duration::from_secs(10));
        dl.tick().await;
        clock.advance(Duration::from_secs(10));
        dl.tick().await;

        assert_eq!(store.windows(), vec![(0, 11), (0, 21), (10, 31)]);
        let stats = dl.stats.read().await.clone();
        assert_eq!(stats.polls, 3);
        assert_eq!(stats.poll_failures, 1);
    }

    #[tokio::test]
    async fn first_window_covers_every_overdue_task_by_default() {
        let store = Arc::new(RecordingStore::new(0));
        let clock = clock_at(T0, 0);
        let overdue = Task::new("http://x", at(T0 - 3));
        let ancient = Task::new("http://x", at(1_000));
        store.save(&overdue).await.unwrap();
        store.save(&ancient).await.unwrap();

        let mut dl = dispatch_loop(store.clone(), &clock, Duration::from_secs(10), None);
        dl.tick().await;

        assert_eq!(store.windows(), vec![(-i64::try_from(T0).unwrap(), 11)]);
        assert!(dl.pool.wait_idle(Duration::from_secs(5)).await);
        assert!(store.inner.is_empty().await);
        assert_eq!(dl.stats.read().await.deliveries_succeeded, 2);
    }

    #[tokio::test]
    async fn startup_lookback_limits_first_window() {
        let store = Arc::new(RecordingStore::new(0));
        let clock = clock_at(T0, 0);
        let mut dl =
            dispatch_loop(store.clone(), &clock, Duration::from_secs(10), Some(Duration::from_secs(60)));

        dl.tick().await;

        assert_eq!(store.windows(), vec![(-60, 11)]);
    }

    #[tokio::test]
    async fn due_tasks_are_dispatched_and_deleted() {
        let store = Arc::new(RecordingStore::new(0));
        let clock = clock_at(T0, 0);
        let due = Task::new("http://x", at(T0 + 5));
        let later = Task::new("http://x", at(T0 + 35));
        store.save(&due).await.unwrap();
        store.save(&later).await.unwrap();

        let mut dl = dispatch_loop(store.clone(), &clock, Duration::from_secs(10), None);
        dl.tick().await;

        assert!(dl.pool.wait_idle(Duration::from_secs(5)).await);
        assert!(store.get_task(&due.id).await.unwrap().is_none());
        assert!(store.get_task(&later.id).await.unwrap().is_some());

        let stats = dl.stats.read().await.clone();
        assert_eq!(stats.tasks_dispatched, 1);
        assert_eq!(stats.deliveries_succeeded, 1);
    }

    #[tokio::test]
    async fn tick_loop_runs_on_the_injected_clock() {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = clock_at(T0, 0);
        let task = Task::new("http://x", at(T0 + 30));
        store.save(&task).await.unwrap();

        let config = DispatchConfig { tick_interval: Duration::from_secs(10), ..DispatchConfig::default() };
        let mut dispatcher =
            Dispatcher::new(store.clone(), Arc::new(AcceptAll), config, Arc::new(clock.clone())).unwrap();
        dispatcher.start().unwrap();

        for _ in 0..10_000 {
            if store.is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(store.is_empty().await, "task not delivered on virtual time");
        assert!(clock.now_utc() >= at(T0 + 30));
        assert!(dispatcher.stats().await.polls >= 3);
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await);
    }

    #[test]
    fn zero_tick_interval_rejected() {
        let config = DispatchConfig { tick_interval: Duration::ZERO, ..DispatchConfig::default() };
        assert!(config.validate().is_err());

        let config = DispatchConfig { max_concurrent_deliveries: 0, ..DispatchConfig::default() };
        assert!(config.validate().is_err());

        assert!(DispatchConfig::default().validate().is_ok());
        assert_eq!(DispatchConfig::default().startup_lookback, None);
    }
}
