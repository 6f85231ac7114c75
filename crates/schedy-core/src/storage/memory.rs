//! In-memory task store.
//!
//! Holds the same encoded keys and values as the SQLite backend in a
//! `BTreeMap`, so ordering, range scans and corrupt-record handling behave
//! identically.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    decode_task, due_range, encode_task, key_for, task_key, StoreFuture, TaskStore, KEY_PREFIX,
    KEY_PREFIX_END,
};
use crate::models::{Task, TaskFilter, TaskId};

/// Ordered in-memory task store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    records: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes under `key`, bypassing encoding.
    pub async fn insert_raw(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.records.write().await.insert(key.into(), value.into());
    }

    /// Number of records, including undecodable ones.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn scan(&self, lo: String, hi: String) -> Vec<Task> {
        self.records
            .read()
            .await
            .range(lo..hi)
            .filter_map(|(key, value)| decode_task(key, value))
            .collect()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn save(&self, task: &Task) -> StoreFuture<'_, ()> {
        let key = task_key(task);
        let encoded = encode_task(task);
        Box::pin(async move {
            self.records.write().await.insert(key, encoded?);
            Ok(())
        })
    }

    fn get_task<'a>(&'a self, id: &'a TaskId) -> StoreFuture<'a, Option<Task>> {
        Box::pin(async move {
            let tasks = self.scan(KEY_PREFIX.to_string(), KEY_PREFIX_END.to_string()).await;
            Ok(tasks.into_iter().find(|task| &task.id == id))
        })
    }

    fn list_tasks(&self) -> StoreFuture<'_, Vec<Task>> {
        Box::pin(async move {
            Ok(self.scan(KEY_PREFIX.to_string(), KEY_PREFIX_END.to_string()).await)
        })
    }

    fn get_due_tasks(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<Task>> {
        Box::pin(async move {
            let (lo, hi) = due_range(start, end);
            if lo >= hi {
                return Ok(Vec::new());
            }
            Ok(self.scan(lo, hi).await)
        })
    }

    fn delete<'a>(&'a self, id: &'a TaskId, execute_at_secs: u64) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.records.write().await.remove(&key_for(id, execute_at_secs));
            Ok(())
        })
    }

    fn delete_tasks<'a>(&'a self, filter: &'a TaskFilter) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let matching: Vec<String> = records
                .range(KEY_PREFIX.to_string()..KEY_PREFIX_END.to_string())
                .filter_map(|(key, value)| {
                    decode_task(key, value).filter(|task| filter.matches(task)).map(|_| key.clone())
                })
                .collect();

            for key in &matching {
                records.remove(key);
            }
            Ok(matching.len())
        })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
