//! The `Store` trait: typed operations over the backing KV/stream store.
//!
//! The adapter is the single component permitted to know the concrete key
//! layout. Structure echoes a repository-trait idiom —
//! `tracing::instrument`-friendly async methods, explicit error wrapping —
//! adapted to a key/value + stream model instead of relational rows.

use async_trait::async_trait;
use std::time::Duration;

/// One entry read back from a task's stream log: the stream entry id
/// (e.g. Redis's `<ms>-<seq>`) plus the raw JSON payload of its `result` field.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub result_json: String,
}

/// Store adapter failure. Never silently dropped — every call site either
/// propagates this or, for parser/decode failures the engine recovers from,
/// logs and removes the offending id from whatever set produced it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backing store transport error: {0}")]
    Backend(String),

    #[error("failed to (de)serialize stored value: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn queue_push(&self, task_json: &str) -> Result<(), StoreError>;
    async fn queue_push_front(&self, task_json: &str) -> Result<(), StoreError>;
    async fn queue_pop_blocking(&self, timeout: Duration) -> Result<Option<String>, StoreError>;
    async fn queue_snapshot(&self) -> Result<Vec<String>, StoreError>;
    async fn queue_remove_one(&self, task_json: &str) -> Result<bool, StoreError>;

    async fn queued_index_add(&self, score: f64, task_id: &str) -> Result<(), StoreError>;
    async fn queued_index_remove(&self, task_id: &str) -> Result<(), StoreError>;

    async fn set_task(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn get_task(&self, task_id: &str) -> Result<Option<String>, StoreError>;
    async fn del_task(&self, task_id: &str) -> Result<(), StoreError>;

    async fn set_result(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn get_result(&self, task_id: &str) -> Result<Option<String>, StoreError>;
    async fn del_result(&self, task_id: &str) -> Result<(), StoreError>;

    async fn stream_append(&self, task_id: &str, result_json: &str) -> Result<String, StoreError>;
    async fn stream_read(
        &self,
        task_id: &str,
        from_id: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError>;
    async fn stream_expire(&self, task_id: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Returns `true` if `task_id` was newly inserted (the caller now exclusively
    /// owns it); `false` if it was already a member (duplicate-delivery signal).
    async fn processing_add(&self, task_id: &str) -> Result<bool, StoreError>;
    async fn processing_remove(&self, task_id: &str) -> Result<(), StoreError>;
    async fn processing_members(&self) -> Result<Vec<String>, StoreError>;

    async fn delayed_add(&self, run_at: f64, task_json: &str) -> Result<(), StoreError>;
    async fn delayed_range_due(&self, now: f64) -> Result<Vec<String>, StoreError>;
    async fn delayed_remove(&self, task_json: &str) -> Result<(), StoreError>;

    async fn history_add(&self, score: f64, task_id: &str) -> Result<(), StoreError>;
    async fn history_set(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn history_get(&self, task_id: &str) -> Result<Option<String>, StoreError>;
    async fn history_range_rev(&self, offset: usize, count: usize) -> Result<Vec<String>, StoreError>;
    async fn history_remove_older(&self, cutoff: f64) -> Result<(), StoreError>;
    /// All history ids, newest first. Used by `stats()`, which must iterate the
    /// entire index — documented O(history size).
    async fn history_all_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn workers_put(&self, worker_id: &str, json: &str) -> Result<(), StoreError>;
    async fn workers_get(&self, worker_id: &str) -> Result<Option<String>, StoreError>;
    async fn workers_del(&self, worker_id: &str) -> Result<(), StoreError>;
    async fn workers_all(&self) -> Result<Vec<(String, String)>, StoreError>;

    async fn cancel_set(&self, task_id: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn cancel_exists(&self, task_id: &str) -> Result<bool, StoreError>;

    async fn progress_put(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn progress_get(&self, task_id: &str) -> Result<Option<String>, StoreError>;
}
