//! Webhook delivery and dispatch for scheduled tasks.
//!
//! # Architecture
//!
//! A [`Dispatcher`] polls the task store on a fixed tick for tasks due within
//! the next tick interval and hands each one to the [`WorkerPool`]. Every
//! task gets its own worker which:
//!
//! 1. **Waits** until the task's fire time
//! 2. **Delivers** it through an [`Executor`] under a concurrency permit
//! 3. **Deletes** it from the store on success
//! 4. **Retries** on failure as allowed by its [`AttemptPolicy`], leaving it
//!    persisted once the budget is spent
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use schedy_core::{RealClock, SqliteTaskStore};
//! use schedy_delivery::{DeliveryClient, DispatchConfig, Dispatcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteTaskStore::open("sqlite://schedy.db").await?);
//! let client = Arc::new(DeliveryClient::with_defaults()?);
//! let mut dispatcher =
//!     Dispatcher::new(store, client, DispatchConfig::default(), Arc::new(RealClock))?;
//!
//! dispatcher.start()?;
//! # Ok(())
//! # }
//! ```

pub mod attempt;
pub mod client;
pub mod dispatcher;
pub mod error;
mod worker;
pub mod worker_pool;

pub use attempt::AttemptPolicy;
pub use client::{ClientConfig, DeliveryClient, DeliveryOutcome, Executor};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use worker::{DispatchStats, WorkerOutcome};
pub use worker_pool::WorkerPool;

/// Default time between dispatcher polls, in seconds.
pub const DEFAULT_TICK_INTERVAL_SECONDS: u64 = 10;

/// Default cap on simultaneous deliveries.
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 64;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
