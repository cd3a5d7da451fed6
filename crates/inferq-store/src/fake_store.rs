//! In-memory `Store` for tests that exercise engine/worker-loop behavior
//! without a live Redis server.
//!
//! Tests against concrete local state rather than mocks of the store trait's
//! individual methods.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::store::{Store, StoreError, StreamEntry};

struct Expiring {
    value: String,
    expires_at: Option<Instant>,
}

impl Expiring {
    fn fresh(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<String>,
    tasks: HashMap<String, Expiring>,
    results: HashMap<String, Expiring>,
    streams: HashMap<String, Vec<(String, String)>>,
    stream_seq: HashMap<String, u64>,
    processing: HashSet<String>,
    delayed: Vec<(f64, String)>,
    queued_index: HashMap<String, f64>,
    history_index: Vec<(f64, String)>,
    history_entries: HashMap<String, Expiring>,
    workers: HashMap<String, String>,
    cancelled: HashMap<String, Expiring>,
    progress: HashMap<String, Expiring>,
}

/// In-memory implementation of [`Store`], guarded by a single `tokio::sync::Mutex`.
/// Single-process, single-instance only — intended for tests.
#[derive(Clone, Default)]
pub struct FakeStore {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[async_trait]
impl Store for FakeStore {
    async fn queue_push(&self, task_json: &str) -> Result<(), StoreError> {
        self.inner.lock().await.queue.push_back(task_json.to_string());
        Ok(())
    }

    async fn queue_push_front(&self, task_json: &str) -> Result<(), StoreError> {
        self.inner.lock().await.queue.push_front(task_json.to_string());
        Ok(())
    }

    async fn queue_pop_blocking(&self, timeout: Duration) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(v) = inner.queue.pop_front() {
                    return Ok(Some(v));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL.min(timeout)).await;
        }
    }

    async fn queue_snapshot(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().await.queue.iter().cloned().collect())
    }

    async fn queue_remove_one(&self, task_json: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.queue.iter().position(|v| v == task_json) {
            inner.queue.remove(pos);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn queued_index_add(&self, score: f64, task_id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.queued_index.insert(task_id.to_string(), score);
        Ok(())
    }

    async fn queued_index_remove(&self, task_id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.queued_index.remove(task_id);
        Ok(())
    }

    async fn set_task(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .tasks
            .insert(task_id.to_string(), Expiring::fresh(json.to_string(), ttl));
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .get(task_id)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    async fn del_task(&self, task_id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.tasks.remove(task_id);
        Ok(())
    }

    async fn set_result(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .results
            .insert(task_id.to_string(), Expiring::fresh(json.to_string(), ttl));
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .results
            .get(task_id)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    async fn del_result(&self, task_id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.results.remove(task_id);
        Ok(())
    }

    async fn stream_append(&self, task_id: &str, result_json: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        let seq = inner.stream_seq.entry(task_id.to_string()).or_insert(0);
        *seq += 1;
        let id = format!("{seq}-0");
        inner
            .streams
            .entry(task_id.to_string())
            .or_default()
            .push((id.clone(), result_json.to_string()));
        Ok(id)
    }

    async fn stream_read(
        &self,
        task_id: &str,
        from_id: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let from_seq: u64 = from_id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let deadline = Instant::now() + block;
        loop {
            {
                let inner = self.inner.lock().await;
                if let Some(entries) = inner.streams.get(task_id) {
                    let matching: Vec<StreamEntry> = entries
                        .iter()
                        .filter(|(id, _)| {
                            id.split('-').next().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0) > from_seq
                        })
                        .take(count)
                        .map(|(id, json)| StreamEntry {
                            id: id.clone(),
                            result_json: json.clone(),
                        })
                        .collect();
                    if !matching.is_empty() {
                        return Ok(matching);
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            sleep(POLL_INTERVAL.min(block)).await;
        }
    }

    async fn stream_expire(&self, _task_id: &str, _ttl: Duration) -> Result<(), StoreError> {
        Ok(())
    }

    async fn processing_add(&self, task_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.processing.insert(task_id.to_string()))
    }

    async fn processing_remove(&self, task_id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.processing.remove(task_id);
        Ok(())
    }

    async fn processing_members(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().await.processing.iter().cloned().collect())
    }

    async fn delayed_add(&self, run_at: f64, task_json: &str) -> Result<(), StoreError> {
        self.inner.lock().await.delayed.push((run_at, task_json.to_string()));
        Ok(())
    }

    async fn delayed_range_due(&self, now: f64) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .delayed
            .iter()
            .filter(|(run_at, _)| *run_at <= now)
            .map(|(_, json)| json.clone())
            .collect())
    }

    async fn delayed_remove(&self, task_json: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.delayed.retain(|(_, json)| json != task_json);
        Ok(())
    }

    async fn history_add(&self, score: f64, task_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.history_index.retain(|(_, id)| id != task_id);
        inner.history_index.push((score, task_id.to_string()));
        Ok(())
    }

    async fn history_set(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .history_entries
            .insert(task_id.to_string(), Expiring::fresh(json.to_string(), ttl));
        Ok(())
    }

    async fn history_get(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .history_entries
            .get(task_id)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    async fn history_range_rev(&self, offset: usize, count: usize) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut sorted = inner.history_index.clone();
        sorted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(sorted
            .into_iter()
            .skip(offset)
            .take(count)
            .map(|(_, id)| id)
            .collect())
    }

    async fn history_remove_older(&self, cutoff: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.history_index.retain(|(score, _)| *score >= cutoff);
        Ok(())
    }

    async fn history_all_ids(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut sorted = inner.history_index.clone();
        sorted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(sorted.into_iter().map(|(_, id)| id).collect())
    }

    async fn workers_put(&self, worker_id: &str, json: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .workers
            .insert(worker_id.to_string(), json.to_string());
        Ok(())
    }

    async fn workers_get(&self, worker_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().await.workers.get(worker_id).cloned())
    }

    async fn workers_del(&self, worker_id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.workers.remove(worker_id);
        Ok(())
    }

    async fn workers_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .workers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn cancel_set(&self, task_id: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .cancelled
            .insert(task_id.to_string(), Expiring::fresh("1".to_string(), ttl));
        Ok(())
    }

    async fn cancel_exists(&self, task_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.cancelled.get(task_id).is_some_and(|e| e.is_live()))
    }

    async fn progress_put(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .progress
            .insert(task_id.to_string(), Expiring::fresh(json.to_string(), ttl));
        Ok(())
    }

    async fn progress_get(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .progress
            .get(task_id)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_push_pop_is_fifo() {
        let store = FakeStore::new();
        store.queue_push("a").await.unwrap();
        store.queue_push("b").await.unwrap();
        assert_eq!(
            store.queue_pop_blocking(Duration::from_millis(50)).await.unwrap(),
            Some("a".to_string())
        );
        assert_eq!(
            store.queue_pop_blocking(Duration::from_millis(50)).await.unwrap(),
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn queue_push_front_takes_priority() {
        let store = FakeStore::new();
        store.queue_push("a").await.unwrap();
        store.queue_push_front("promoted").await.unwrap();
        assert_eq!(
            store.queue_pop_blocking(Duration::from_millis(50)).await.unwrap(),
            Some("promoted".to_string())
        );
    }

    #[tokio::test]
    async fn queue_pop_blocking_times_out_on_empty_queue() {
        let store = FakeStore::new();
        let start = Instant::now();
        let result = store.queue_pop_blocking(Duration::from_millis(30)).await.unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn processing_add_is_single_ownership() {
        let store = FakeStore::new();
        assert!(store.processing_add("t1").await.unwrap());
        assert!(!store.processing_add("t1").await.unwrap());
    }

    #[tokio::test]
    async fn delayed_range_due_respects_score() {
        let store = FakeStore::new();
        store.delayed_add(100.0, "late").await.unwrap();
        store.delayed_add(10.0, "ready").await.unwrap();
        let due = store.delayed_range_due(50.0).await.unwrap();
        assert_eq!(due, vec!["ready".to_string()]);
    }

    #[tokio::test]
    async fn history_range_rev_is_newest_first() {
        let store = FakeStore::new();
        store.history_add(1.0, "first").await.unwrap();
        store.history_add(2.0, "second").await.unwrap();
        store.history_add(3.0, "third").await.unwrap();
        let page = store.history_range_rev(0, 2).await.unwrap();
        assert_eq!(page, vec!["third".to_string(), "second".to_string()]);
    }
}
