//! Time-ordered task persistence.
//!
//! Every task lives under a single key in an ordered keyspace:
//!
//! ```text
//! task:<16-digit zero-padded unix seconds of execute_at>:<id>
//! ```
//!
//! Lexicographic key order is therefore chronological order, and a due-task
//! poll is a range scan between two bare `task:<seconds>` bounds. Values are
//! the JSON encoding of [`Task`]. There is no secondary index, so lookups by
//! id scan the whole keyspace.
//!
//! Two backends implement [`TaskStore`]: [`SqliteTaskStore`] for production
//! and [`InMemoryTaskStore`] for tests and ephemeral runs.

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    error::Result,
    models::{unix_secs, Task, TaskFilter, TaskId},
};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Common prefix of every task key.
pub const KEY_PREFIX: &str = "task:";

/// Exclusive upper bound of the task keyspace (`:` + 1).
pub(crate) const KEY_PREFIX_END: &str = "task;";

/// Boxed future returned by [`TaskStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence operations used by the dispatcher and the API.
///
/// Missing tasks are never an error: lookups return `None` and deletes of
/// absent keys succeed silently. Records that fail to decode are skipped with
/// a warning during scans and never returned, counted or deleted.
pub trait TaskStore: Send + Sync + 'static {
    /// Inserts or overwrites the record under the task's encoded key.
    ///
    /// Changing `execute_at` to a different second produces a new key, so the
    /// previous record stays behind.
    fn save(&self, task: &Task) -> StoreFuture<'_, ()>;

    /// Finds a task by id with a full scan.
    fn get_task<'a>(&'a self, id: &'a TaskId) -> StoreFuture<'a, Option<Task>>;

    /// Returns every task in time order.
    fn list_tasks(&self) -> StoreFuture<'_, Vec<Task>>;

    /// Returns tasks whose `execute_at` second lies in `[start, end)`, in key
    /// order.
    fn get_due_tasks(&self, start: DateTime<Utc>, end: DateTime<Utc>)
        -> StoreFuture<'_, Vec<Task>>;

    /// Removes the record with exactly this id and timestamp.
    fn delete<'a>(&'a self, id: &'a TaskId, execute_at_secs: u64) -> StoreFuture<'a, ()>;

    /// Removes every task matching `filter` and returns how many were removed.
    fn delete_tasks<'a>(&'a self, filter: &'a TaskFilter) -> StoreFuture<'a, usize>;

    /// Verifies the backend is reachable.
    fn health_check(&self) -> StoreFuture<'_, ()>;
}

/// Bare range bound for a second: `task:<secs:016>`.
pub fn time_bound(secs: u64) -> String {
    format!("{KEY_PREFIX}{secs:016}")
}

/// Full key for a task id at a given second.
pub fn key_for(id: &TaskId, execute_at_secs: u64) -> String {
    format!("{}:{}", time_bound(execute_at_secs), id)
}

/// Full key for a task.
pub fn task_key(task: &Task) -> String {
    key_for(&task.id, task.execute_at_secs())
}

/// Range bounds `[start, end)` for a due-task scan.
pub(crate) fn due_range(start: DateTime<Utc>, end: DateTime<Utc>) -> (String, String) {
    (time_bound(unix_secs(start)), time_bound(unix_secs(end)))
}

/// Encodes a task value.
pub(crate) fn encode_task(task: &Task) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(task)?)
}

/// Decodes a stored value, logging and discarding corrupt records.
pub(crate) fn decode_task(key: &str, value: &[u8]) -> Option<Task> {
    match serde_json::from_slice::<Task>(value) {
        Ok(task) => Some(task),
        Err(e) => {
            warn!(key = %key, error = %e, "skipping undecodable task record");
            None
        },
    }
}
