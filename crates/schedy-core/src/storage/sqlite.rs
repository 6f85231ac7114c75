//! SQLite-backed task store.
//!
//! A single key/value table whose primary-key B-tree provides the ordered
//! keyspace. Each operation is its own statement or transaction; nothing
//! spans a poll and the delivery that follows it.

use std::{str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{debug, info};

use super::{
    decode_task, due_range, encode_task, key_for, task_key, StoreFuture, TaskStore, KEY_PREFIX,
    KEY_PREFIX_END,
};
use crate::{
    error::Result,
    models::{Task, TaskFilter, TaskId},
};

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS tasks (
        key   TEXT PRIMARY KEY NOT NULL,
        value BLOB NOT NULL
    )
";

/// Production task store on an embedded SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists.
    ///
    /// In-memory URLs get a single long-lived connection so every query sees
    /// the same database.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the file cannot be opened or the
    /// schema cannot be created.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .min_connections(u32::from(in_memory))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        info!(url = %url, "opened sqlite task store");
        Self::from_pool(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if SQLite cannot be initialised.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    /// Wraps an existing pool, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn scan(&self, lo: &str, hi: &str) -> Result<Vec<Task>> {
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT key, value FROM tasks WHERE key >= ?1 AND key < ?2 ORDER BY key")
                .bind(lo)
                .bind(hi)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().filter_map(|(key, value)| decode_task(&key, &value)).collect())
    }

    async fn save_impl(&self, task: &Task) -> Result<()> {
        let value = encode_task(task)?;
        sqlx::query(
            "INSERT INTO tasks (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(task_key(task))
        .bind(value)
        .execute(&self.pool)
        .await?;

        debug!(task_id = %task.id, execute_at = %task.execute_at, "task saved");
        Ok(())
    }

    async fn delete_tasks_impl(&self, filter: &TaskFilter) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT key, value FROM tasks WHERE key >= ?1 AND key < ?2 ORDER BY key")
                .bind(KEY_PREFIX)
                .bind(KEY_PREFIX_END)
                .fetch_all(&mut *tx)
                .await?;

        let mut deleted = 0;
        for (key, value) in rows {
            let Some(task) = decode_task(&key, &value) else { continue };
            if !filter.matches(&task) {
                continue;
            }
            sqlx::query("DELETE FROM tasks WHERE key = ?1").bind(&key).execute(&mut *tx).await?;
            deleted += 1;
        }

        tx.commit().await?;
        Ok(deleted)
    }
}

impl TaskStore for SqliteTaskStore {
    fn save(&self, task: &Task) -> StoreFuture<'_, ()> {
        let task = task.clone();
        Box::pin(async move { self.save_impl(&task).await })
    }

    fn get_task<'a>(&'a self, id: &'a TaskId) -> StoreFuture<'a, Option<Task>> {
        Box::pin(async move {
            let tasks = self.scan(KEY_PREFIX, KEY_PREFIX_END).await?;
            Ok(tasks.into_iter().find(|task| &task.id == id))
        })
    }

    fn list_tasks(&self) -> StoreFuture<'_, Vec<Task>> {
        Box::pin(self.scan(KEY_PREFIX, KEY_PREFIX_END))
    }

    fn get_due_tasks(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<Task>> {
        Box::pin(async move {
            let (lo, hi) = due_range(start, end);
            self.scan(&lo, &hi).await
        })
    }

    fn delete<'a>(&'a self, id: &'a TaskId, execute_at_secs: u64) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM tasks WHERE key = ?1")
                .bind(key_for(id, execute_at_secs))
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn delete_tasks<'a>(&'a self, filter: &'a TaskFilter) -> StoreFuture<'a, usize> {
        Box::pin(self.delete_tasks_impl(filter))
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
            Ok(())
        })
    }
}
