//! HTTP request handlers.
//!
//! - `tasks` - task creation, lookup, listing and deletion
//! - `health` - store connectivity check

pub mod health;
pub mod tasks;

pub use health::health_check;
pub use tasks::{create_task, delete_task, delete_tasks, get_task, list_tasks};
