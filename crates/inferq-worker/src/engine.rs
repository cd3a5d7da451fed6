//! The `Engine`: registry, Producer API, and the shared state the worker
//! loop, reaper, and stream channel operate on.
//!
//! A cloneable handle backed by a shared store, holding its own config and a
//! shutdown flag — adapted from a row-oriented queue to the Redis key layout
//! in `inferq-store`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use inferq_core::{
    EngineConfig, EngineError, HookError, LifecycleHooks, NoOpLifecycleHooks, Payload, Progress,
    Task, TaskStatus, WorkerRegistration, WorkerState,
};
use inferq_infra::{NoOpWebhookSink, WebhookSink};
use inferq_store::{Store, StoreError};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::handler::{Handler, HandlerOptions, RegisteredHandler};

/// Aggregated statistics returned by `stats()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_task_name: HashMap<String, TaskNameStats>,
    pub failed_tasks: Vec<FailedTaskSummary>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TaskNameStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FailedTaskSummary {
    pub task_id: String,
    pub task_name: String,
    pub error: Option<String>,
    pub finished_at: Option<f64>,
}

/// The coordination engine: one instance per producer or worker process.
///
/// Internally wraps a cloneable `Arc`-backed store handle, matching the
/// teacher's `TaskQueue` cloning convention (`Clone` just clones the handles).
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) config: EngineConfig,
    pub(crate) hooks: Arc<dyn LifecycleHooks>,
    pub(crate) webhook: Arc<dyn WebhookSink>,
    pub(crate) handlers: RwLock<HashMap<String, RegisteredHandler>>,
    pub(crate) worker_id: String,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) status: Mutex<WorkerState>,
    pub(crate) last_heartbeat: Mutex<std::time::Instant>,
    pub(crate) last_prune: Mutex<std::time::Instant>,
    pub(crate) last_promote: Mutex<std::time::Instant>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Arc<Self> {
        Self::with_hooks(store, config, Arc::new(NoOpLifecycleHooks))
    }

    pub fn with_hooks(
        store: Arc<dyn Store>,
        config: EngineConfig,
        hooks: Arc<dyn LifecycleHooks>,
    ) -> Arc<Self> {
        let webhook: Arc<dyn WebhookSink> = match config.webhook_url.clone() {
            Some(url) => Arc::new(inferq_infra::ReqwestWebhookSink::new(url)),
            None => Arc::new(NoOpWebhookSink),
        };
        Self::with_hooks_and_webhook(store, config, hooks, webhook)
    }

    pub fn with_hooks_and_webhook(
        store: Arc<dyn Store>,
        config: EngineConfig,
        hooks: Arc<dyn LifecycleHooks>,
        webhook: Arc<dyn WebhookSink>,
    ) -> Arc<Self> {
        let worker_id = config.worker_id.clone();
        Arc::new(Self {
            store,
            config,
            hooks,
            webhook,
            handlers: RwLock::new(HashMap::new()),
            worker_id,
            stop: Arc::new(AtomicBool::new(false)),
            status: Mutex::new(WorkerState::Idle),
            last_heartbeat: Mutex::new(std::time::Instant::now() - Duration::from_secs(3600)),
            last_prune: Mutex::new(std::time::Instant::now() - Duration::from_secs(3600)),
            last_promote: Mutex::new(std::time::Instant::now() - Duration::from_secs(3600)),
        })
    }

    /// Cooperative stop signal: flips a flag checked at the top of the worker
    /// loop.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.config.task_ttl_secs.max(0) as u64)
    }

    fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.config.task_history_retention_secs.max(0) as u64)
    }

    // ---- §4.3 Producer API -------------------------------------------------

    /// Binds `name` to a callable with `{timeout, stream, retries}` options.
    /// Re-advertises the updated capability set via `register()`.
    #[tracing::instrument(skip(self, name, handler))]
    pub async fn register_task(
        &self,
        name: impl Into<String>,
        handler: Handler,
        options: HandlerOptions,
    ) -> Result<(), EngineError> {
        let name = name.into();
        {
            let mut handlers = self.handlers.write().await;
            handlers.insert(
                name,
                RegisteredHandler {
                    handler,
                    options,
                },
            );
        }
        self.register().await
    }

    async fn registered_names(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }

    pub async fn register(&self) -> Result<(), EngineError> {
        let registration = WorkerRegistration {
            worker_id: self.worker_id.clone(),
            allowed_tasks: self.registered_names().await,
            status: *self.status.lock().await,
            last_heartbeat: Utc::now(),
            system_info: None,
        };
        self.put_registration(&registration).await
    }

    pub async fn heartbeat(&self) -> Result<(), EngineError> {
        let registration = WorkerRegistration {
            worker_id: self.worker_id.clone(),
            allowed_tasks: self.registered_names().await,
            status: *self.status.lock().await,
            last_heartbeat: Utc::now(),
            system_info: None,
        };
        self.put_registration(&registration).await
    }

    pub async fn update_status(&self, state: WorkerState) -> Result<(), EngineError> {
        *self.status.lock().await = state;
        let registration = WorkerRegistration {
            worker_id: self.worker_id.clone(),
            allowed_tasks: self.registered_names().await,
            status: state,
            last_heartbeat: Utc::now(),
            system_info: None,
        };
        self.put_registration(&registration).await
    }

    async fn put_registration(&self, registration: &WorkerRegistration) -> Result<(), EngineError> {
        let json = serde_json::to_string(registration).map_err(|e| EngineError::Store(e.into()))?;
        self.store
            .workers_put(&registration.worker_id, &json)
            .await
            .map_err(store_err)
    }

    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, name, data, task_id, additional_params))]
    pub async fn enqueue(
        &self,
        name: impl Into<String>,
        data: Value,
        task_id: Option<String>,
        additional_params: Option<HashMap<String, Value>>,
    ) -> Result<Task, EngineError> {
        let name = name.into();
        let defaults = self
            .handlers
            .read()
            .await
            .get(&name)
            .map(|h| h.options.clone())
            .unwrap_or_default();

        let payload = Payload {
            data,
            timeout: defaults.timeout,
            stream: defaults.stream,
            retries: defaults.retries,
        };

        let mut task = Task::new(name, payload, task_id);
        task.additional_params = additional_params.unwrap_or_default();

        if let Err(HookError(msg)) = self.hooks.before_enqueue(&task).await {
            tracing::warn!(hook = "before_enqueue", error = %msg, "lifecycle hook failed");
        }

        let json = serde_json::to_string(&task).map_err(|e| EngineError::Store(e.into()))?;
        self.store.queue_push(&json).await.map_err(store_err)?;
        let queued_score = task
            .queued_at
            .map(|t| t.timestamp_millis() as f64 / 1000.0)
            .unwrap_or(0.0);
        self.store
            .queued_index_add(queued_score, &task.task_id)
            .await
            .map_err(store_err)?;
        self.store
            .set_task(&task.task_id, &json, self.task_ttl())
            .await
            .map_err(store_err)?;
        self.store
            .history_add(task.created_at.timestamp_millis() as f64 / 1000.0, &task.task_id)
            .await
            .map_err(store_err)?;
        self.store
            .history_set(&task.task_id, &json, self.history_ttl())
            .await
            .map_err(store_err)?;

        if let Err(HookError(msg)) = self.hooks.after_enqueue(&task).await {
            tracing::warn!(hook = "after_enqueue", error = %msg, "lifecycle hook failed");
        }

        Ok(task)
    }

    pub async fn enqueue_delayed(&self, task: &Task, delay_seconds: i64) -> Result<(), EngineError> {
        let run_at = Utc::now().timestamp_millis() as f64 / 1000.0 + delay_seconds as f64;
        let json = serde_json::to_string(task).map_err(|e| EngineError::Store(e.into()))?;
        self.store.delayed_add(run_at, &json).await.map_err(store_err)
    }

    /// Writes the (idempotent) cancel flag, removes the task from the queue if
    /// still queued, transitions the task record to `cancelled`.
    #[tracing::instrument(skip(self), fields(task.id = %task_id))]
    pub async fn cancel(&self, task_id: &str) -> Result<bool, EngineError> {
        self.store
            .cancel_set(task_id, self.task_ttl())
            .await
            .map_err(store_err)?;

        let removed_from_queue = self.remove_from_queue(task_id).await?;

        match self.store.get_task(task_id).await.map_err(store_err)? {
            Some(json) => {
                let mut task: Task =
                    serde_json::from_str(&json).map_err(|e| EngineError::Store(e.into()))?;
                task.status = TaskStatus::Cancelled;
                task.finished_at = Some(Utc::now());
                self.persist_task(&task).await?;
                Ok(true)
            }
            None => Ok(removed_from_queue),
        }
    }

    pub async fn remove_from_queue(&self, task_id: &str) -> Result<bool, EngineError> {
        let snapshot = self.store.queue_snapshot().await.map_err(store_err)?;
        for entry in snapshot {
            if let Ok(task) = serde_json::from_str::<Task>(&entry) {
                if task.task_id == task_id {
                    let removed = self.store.queue_remove_one(&entry).await.map_err(store_err)?;
                    self.store.queued_index_remove(task_id).await.map_err(store_err)?;
                    return Ok(removed);
                }
            }
        }
        Ok(false)
    }

    pub(crate) async fn persist_task(&self, task: &Task) -> Result<(), EngineError> {
        let json = serde_json::to_string(task).map_err(|e| EngineError::Store(e.into()))?;
        self.store
            .set_task(&task.task_id, &json, self.task_ttl())
            .await
            .map_err(store_err)?;
        self.store
            .history_set(&task.task_id, &json, self.history_ttl())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub(crate) async fn persist_terminal(&self, task: &Task) -> Result<(), EngineError> {
        let json = serde_json::to_string(task).map_err(|e| EngineError::Store(e.into()))?;
        self.store
            .set_result(&task.task_id, &json, Duration::from_secs(3600))
            .await
            .map_err(store_err)?;
        self.persist_task(task).await
    }

    // ---- Query operations ---------------------------------------------------

    pub async fn status(&self, task_id: &str) -> Result<Option<TaskStatus>, EngineError> {
        Ok(self.details(task_id).await?.map(|t| t.status))
    }

    /// The producer-facing result getter: polls the task record at ~100ms
    /// until it reaches a terminal status, the caller's `timeout` elapses
    /// (`timeout-kind`), or the task is observed cancelled (`processing-kind`).
    #[tracing::instrument(skip(self), fields(task.id = %task_id))]
    pub async fn wait_for_result(&self, task_id: &str, timeout: Duration) -> Result<Task, EngineError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.details(task_id).await? {
                match task.status {
                    TaskStatus::Completed => return Ok(task),
                    TaskStatus::Failed => {
                        return Err(EngineError::processing(
                            task.error
                                .map(|e| e.message)
                                .unwrap_or_else(|| "task failed".to_string()),
                        ))
                    }
                    TaskStatus::Cancelled => {
                        return Err(EngineError::processing("task was cancelled"))
                    }
                    _ => {}
                }
            }

            if std::time::Instant::now() >= deadline {
                return Err(EngineError::timeout(format!(
                    "task {task_id} did not complete within the wait budget"
                )));
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn details(&self, task_id: &str) -> Result<Option<Task>, EngineError> {
        match self.store.get_task(task_id).await.map_err(store_err)? {
            Some(json) => {
                let task: Task =
                    serde_json::from_str(&json).map_err(|e| EngineError::Store(e.into()))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    pub async fn all_queued(&self) -> Result<Vec<Task>, EngineError> {
        let snapshot = self.store.queue_snapshot().await.map_err(store_err)?;
        Ok(snapshot
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect())
    }

    pub async fn processing(&self) -> Result<Vec<String>, EngineError> {
        self.store.processing_members().await.map_err(store_err)
    }

    pub async fn history(
        &self,
        limit: usize,
        offset: usize,
        status: Option<TaskStatus>,
        name: Option<&str>,
    ) -> Result<Vec<Task>, EngineError> {
        let ids = self
            .store
            .history_range_rev(0, offset + limit.max(1) * 4 + 64)
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        let mut skipped = 0usize;
        for id in ids {
            let Some(task) = self.details(&id).await? else {
                continue;
            };
            if let Some(s) = status {
                if task.status != s {
                    continue;
                }
            }
            if let Some(n) = name {
                if task.task_name != n {
                    continue;
                }
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            results.push(task);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    pub async fn failed(&self, limit: usize) -> Result<Vec<Task>, EngineError> {
        self.history(limit, 0, Some(TaskStatus::Failed), None).await
    }

    pub async fn completed(&self, limit: usize) -> Result<Vec<Task>, EngineError> {
        self.history(limit, 0, Some(TaskStatus::Completed), None).await
    }

    pub async fn by_name(&self, name: &str, limit: usize) -> Result<Vec<Task>, EngineError> {
        self.history(limit, 0, None, Some(name)).await
    }

    pub async fn history_count(&self) -> Result<usize, EngineError> {
        Ok(self.store.history_all_ids().await.map_err(store_err)?.len())
    }

    pub async fn clear_history(&self, older_than_seconds: i64) -> Result<(), EngineError> {
        let cutoff = Utc::now().timestamp_millis() as f64 / 1000.0 - older_than_seconds as f64;
        self.store.history_remove_older(cutoff).await.map_err(store_err)
    }

    pub async fn workers(&self) -> Result<Vec<WorkerRegistration>, EngineError> {
        let all = self.store.workers_all().await.map_err(store_err)?;
        Ok(all
            .into_iter()
            .filter_map(|(_, json)| serde_json::from_str(&json).ok())
            .collect())
    }

    pub async fn worker(&self, id: &str) -> Result<Option<WorkerRegistration>, EngineError> {
        match self.store.workers_get(id).await.map_err(store_err)? {
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }

    /// Portable cooperative-cancellation helper for handler authors: consults
    /// the cancel sidecar flag directly, without relying on host-level thread
    /// cancellation. Handlers doing long work should poll this periodically.
    pub async fn check_cancellation(&self, task_id: &str) -> Result<bool, EngineError> {
        self.store.cancel_exists(task_id).await.map_err(store_err)
    }

    /// Reports incremental progress for a running task. `progress` is clamped
    /// into `[0, 1]`.
    pub async fn report_progress(
        &self,
        task_id: &str,
        progress: f64,
        message: Option<String>,
    ) -> Result<(), EngineError> {
        let record = Progress::new(progress, message);
        let json = serde_json::to_string(&record).map_err(|e| EngineError::Store(e.into()))?;
        self.store
            .progress_put(task_id, &json, self.task_ttl())
            .await
            .map_err(store_err)
    }

    pub async fn get_progress(&self, task_id: &str) -> Result<Option<Progress>, EngineError> {
        match self.store.progress_get(task_id).await.map_err(store_err)? {
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }

    pub async fn delete_queue(&self) -> Result<(), EngineError> {
        let snapshot = self.store.queue_snapshot().await.map_err(store_err)?;
        for entry in snapshot {
            self.store.queue_remove_one(&entry).await.map_err(store_err)?;
        }
        Ok(())
    }

    /// Aggregates over the entire history index: `total`, per-status counts,
    /// per-task-name `{total, completed, failed}`, and up to 10 recent
    /// failures. O(history size).
    pub async fn stats(&self) -> Result<Stats, EngineError> {
        let ids = self.store.history_all_ids().await.map_err(store_err)?;
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_task_name: HashMap<String, TaskNameStats> = HashMap::new();
        let mut failed_tasks = Vec::new();

        for id in &ids {
            let Some(task) = self.details(id).await? else {
                continue;
            };
            *by_status.entry(task.status.to_string()).or_insert(0) += 1;
            let entry = by_task_name.entry(task.task_name.clone()).or_default();
            entry.total += 1;
            match task.status {
                TaskStatus::Completed => entry.completed += 1,
                TaskStatus::Failed => {
                    entry.failed += 1;
                    if failed_tasks.len() < 10 {
                        failed_tasks.push(FailedTaskSummary {
                            task_id: task.task_id.clone(),
                            task_name: task.task_name.clone(),
                            error: task.error.as_ref().map(|e| e.message.clone()),
                            finished_at: task
                                .finished_at
                                .map(|t| t.timestamp_millis() as f64 / 1000.0),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(Stats {
            total: ids.len(),
            by_status,
            by_task_name,
            failed_tasks,
        })
    }
}

pub(crate) fn store_err(e: StoreError) -> EngineError {
    EngineError::Store(anyhow::anyhow!(e))
}
