//! Core task model, time-ordered persistence and clock abstraction.
//!
//! Every other crate builds on the [`Task`] model, the [`TaskStore`]
//! capability and the injectable [`Clock`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{unix_secs, Payload, Task, TaskFilter, TaskId};
pub use storage::{InMemoryTaskStore, SqliteTaskStore, TaskStore};
pub use time::{Clock, RealClock, TestClock};
