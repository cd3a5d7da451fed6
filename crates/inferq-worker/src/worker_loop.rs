//! The single-threaded cooperative worker loop and handler dispatch with a
//! soft timeout.
//!
//! A loop that claims one unit of work, dispatches it, and finalizes
//! ownership in a guard — adapted from a row-locking claim (`SELECT ... FOR
//! UPDATE SKIP LOCKED`) to the processing-set `add-if-absent` claim this
//! queue uses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use inferq_core::{HandlerError, HookError, Task, TaskErrorDetail, TaskStatus, WorkerState};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::handler::{Handler, RegisteredHandler, StreamEmitter};
use crate::retry::compute_retry_delay;

impl Engine {
    /// Runs the worker loop until `stop()` is called. Exits after the current
    /// iteration completes; handlers already dispatched are not pre-empted.
    pub async fn run(self: Arc<Self>) {
        if let Err(HookError(msg)) = self.hooks.before_worker_boot().await {
            tracing::warn!(hook = "before_worker_boot", error = %msg, "lifecycle hook failed");
        }
        if let Err(e) = self.register().await {
            tracing::error!(error = %e, "failed to register worker on boot");
        }
        if let Err(HookError(msg)) = self.hooks.after_worker_boot().await {
            tracing::warn!(hook = "after_worker_boot", error = %msg, "lifecycle hook failed");
        }

        while !self.is_stopped() {
            self.tick_heartbeat().await;
            self.tick_reaper().await;
            self.tick_promote().await;

            *self.status.lock().await = WorkerState::Idle;

            let popped = match self.store.queue_pop_blocking(Duration::from_secs(1)).await {
                Ok(popped) => popped,
                Err(e) => {
                    tracing::error!(error = %e, "queue_pop_blocking failed");
                    continue;
                }
            };

            let Some(raw) = popped else {
                continue;
            };

            *self.status.lock().await = WorkerState::Busy;
            self.handle_popped_payload(raw).await;
        }

        if let Err(HookError(msg)) = self.hooks.before_worker_shutdown().await {
            tracing::warn!(hook = "before_worker_shutdown", error = %msg, "lifecycle hook failed");
        }
        if let Err(HookError(msg)) = self.hooks.after_worker_shutdown().await {
            tracing::warn!(hook = "after_worker_shutdown", error = %msg, "lifecycle hook failed");
        }
    }

    async fn tick_heartbeat(&self) {
        let due = {
            let last = self.last_heartbeat.lock().await;
            last.elapsed() >= Duration::from_secs(inferq_core::config::HEARTBEAT_INTERVAL_SECS)
        };
        if !due {
            return;
        }
        *self.last_heartbeat.lock().await = Instant::now();
        if let Err(e) = self.heartbeat().await {
            tracing::error!(error = %e, "heartbeat failed");
        }
    }

    async fn tick_reaper(&self) {
        let due = {
            let last = self.last_prune.lock().await;
            last.elapsed() >= Duration::from_secs(inferq_core::config::PRUNE_CHECK_INTERVAL_SECS)
        };
        if !due {
            return;
        }
        *self.last_prune.lock().await = Instant::now();
        self.run_reaper().await;
    }

    async fn tick_promote(&self) {
        let due = {
            let last = self.last_promote.lock().await;
            last.elapsed() >= Duration::from_secs(1)
        };
        if !due {
            return;
        }
        *self.last_promote.lock().await = Instant::now();
        if let Err(e) = self.promote_due_delayed().await {
            tracing::error!(error = %e, "promote_due_delayed failed");
        }
    }

    #[tracing::instrument(skip(self, raw))]
    async fn handle_popped_payload(&self, raw: String) {
        let mut task: Task = match serde_json::from_str(&raw) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "failed to decode popped payload, dropping");
                return;
            }
        };

        let claimed = match self.store.processing_add(&task.task_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "processing_add failed");
                return;
            }
        };
        if !claimed {
            tracing::warn!(task_id = %task.task_id, "duplicate delivery observed, dropping");
            return;
        }

        let guard = ProcessingGuard::new(self.store.clone(), task.task_id.clone());

        let registered = {
            let handlers = self.handlers.read().await;
            handlers.get(&task.task_name).cloned()
        };

        let Some(registered) = registered else {
            let count = task
                .additional_params
                .get("_unknown_requeue_count")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                + 1;
            task.additional_params.insert(
                "_unknown_requeue_count".to_string(),
                Value::from(count),
            );
            tracing::warn!(
                task_id = %task.task_id,
                task_name = %task.task_name,
                requeue_count = count,
                "unknown task name, requeueing"
            );
            let requeued = match serde_json::to_string(&task) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to re-encode unknown task, requeueing raw payload");
                    raw
                }
            };
            if let Err(e) = self.store.queue_push(&requeued).await {
                tracing::error!(error = %e, "failed to requeue unknown task");
            }
            guard.finish().await;
            return;
        };

        if self.store.cancel_exists(&task.task_id).await.unwrap_or(false) {
            task.status = TaskStatus::Cancelled;
            task.finished_at = Some(Utc::now());
            if let Err(e) = self.persist_task(&task).await {
                tracing::error!(task_id = %task.task_id, error = %e, "failed to persist cancelled task");
            }
            guard.finish().await;
            return;
        }

        task.status = TaskStatus::Processing;
        task.started_at = Some(Utc::now());
        if let Err(e) = self.persist_task(&task).await {
            tracing::error!(task_id = %task.task_id, error = %e, "failed to persist processing state");
        }

        self.execute_task(task, registered).await;
        guard.finish().await;
    }

    #[tracing::instrument(skip(self, task, registered), fields(task.id = %task.task_id, task.name = %task.task_name))]
    async fn execute_task(&self, task: Task, registered: RegisteredHandler) {
        let timeout_secs = task.payload.timeout.or(registered.options.timeout);

        match &registered.handler {
            Handler::Unary(f) => {
                let fut = f(task.payload.data.clone());
                let outcome = match timeout_secs {
                    Some(secs) => tokio::time::timeout(Duration::from_secs(secs), fut).await,
                    None => Ok(fut.await),
                };
                match outcome {
                    Err(_elapsed) => self.finish_timeout(task).await,
                    Ok(Ok(value)) => self.finish_success(task, value).await,
                    Ok(Err(HandlerError::Retry)) => self.finish_retry(task).await,
                    Ok(Err(HandlerError::Failed(e))) => self.finish_failure(task, e.to_string()).await,
                }
            }
            Handler::Streaming(f) => {
                let mut task = task;
                task.status = TaskStatus::InProgress;
                if let Err(e) = self.persist_task(&task).await {
                    tracing::error!(task_id = %task.task_id, error = %e, "failed to persist in_progress state");
                }

                let (tx, mut rx) = mpsc::channel::<Value>(32);
                let emitter = StreamEmitter::new(tx);
                let mut handler_fut = f(task.payload.data.clone(), emitter);

                let store = self.store.clone();
                let task_id = task.task_id.clone();
                let drive = async move {
                    let mut handler_result: Option<Result<(), HandlerError>> = None;
                    loop {
                        tokio::select! {
                            biased;
                            value = rx.recv() => {
                                match value {
                                    Some(v) => {
                                        let json = serde_json::to_string(&v)
                                            .unwrap_or_else(|_| "null".to_string());
                                        if let Err(e) = store.stream_append(&task_id, &json).await {
                                            tracing::error!(task_id = %task_id, error = %e, "failed to append stream entry");
                                        }
                                    }
                                    None => break,
                                }
                            }
                            result = &mut handler_fut, if handler_result.is_none() => {
                                handler_result = Some(result);
                            }
                        }
                    }
                    handler_result.unwrap_or(Ok(()))
                };

                let outcome = match timeout_secs {
                    Some(secs) => tokio::time::timeout(Duration::from_secs(secs), drive).await,
                    None => Ok(drive.await),
                };

                match outcome {
                    Err(_elapsed) => self.finish_timeout(task).await,
                    Ok(Ok(())) => self.finish_stream_completed(task).await,
                    Ok(Err(HandlerError::Retry)) => self.finish_retry(task).await,
                    Ok(Err(HandlerError::Failed(e))) => self.finish_failure(task, e.to_string()).await,
                }
            }
        }
    }

    async fn finish_success(&self, mut task: Task, value: Value) {
        task.status = TaskStatus::Completed;
        task.result = Some(value);
        task.finished_at = Some(Utc::now());
        if let Err(e) = self.persist_terminal(&task).await {
            tracing::error!(task_id = %task.task_id, error = %e, "failed to persist terminal record");
        }
    }

    async fn finish_stream_completed(&self, mut task: Task) {
        task.status = TaskStatus::Completed;
        task.finished_at = Some(Utc::now());
        if let Err(e) = self
            .store
            .stream_expire(&task.task_id, Duration::from_secs(3600))
            .await
        {
            tracing::error!(task_id = %task.task_id, error = %e, "failed to set stream expiry");
        }
        if let Err(e) = self.persist_terminal(&task).await {
            tracing::error!(task_id = %task.task_id, error = %e, "failed to persist terminal record");
        }
    }

    /// Handler explicitly requested a retry: the retry budget is not touched,
    /// only the payload is carried forward.
    async fn finish_retry(&self, task: Task) {
        let next = task.next_explicit_retry();
        let delay = compute_retry_delay(&self.config);
        if let Err(e) = self.enqueue_delayed(&next, delay.as_secs() as i64).await {
            tracing::error!(task_id = %task.task_id, error = %e, "failed to schedule explicit retry");
        }
    }

    async fn finish_timeout(&self, mut task: Task) {
        task.status = TaskStatus::Failed;
        task.error = Some(TaskErrorDetail::from_message(
            "handler exceeded declared timeout",
        ));
        task.finished_at = Some(Utc::now());
        if let Err(HookError(msg)) = self.hooks.on_timeout(&task).await {
            tracing::warn!(hook = "on_timeout", error = %msg, "lifecycle hook failed");
        }
        self.finalize_failure(task).await;
    }

    async fn finish_failure(&self, mut task: Task, message: String) {
        task.status = TaskStatus::Failed;
        task.error = Some(TaskErrorDetail::captured(message.clone()));
        task.finished_at = Some(Utc::now());
        if let Err(HookError(msg)) = self.hooks.on_error(&task, &message).await {
            tracing::warn!(hook = "on_error", error = %msg, "lifecycle hook failed");
        }
        self.finalize_failure(task).await;
    }

    /// Emits the best-effort webhook, logs the failure, and either schedules a
    /// failure-driven retry or persists the terminal record.
    ///
    /// A pending retry is never surfaced as a terminal record: the task is
    /// re-persisted as `queued` (matching what it will be once the delayed
    /// entry is promoted) instead of `failed`, so `wait_for_result` and the
    /// stream getter keep polling through the delay window rather than
    /// observing a transient failure as the final outcome.
    async fn finalize_failure(&self, task: Task) {
        self.webhook
            .send(serde_json::json!({
                "event": "task_failed",
                "task_id": task.task_id,
                "task_name": task.task_name,
                "error": task.error.as_ref().map(|e| e.message.clone()),
            }))
            .await;

        tracing::error!(
            task_id = %task.task_id,
            task_name = %task.task_name,
            error = ?task.error,
            "task failed"
        );

        match task.next_retry_attempt() {
            Some(next) => {
                if let Err(e) = self.persist_task(&next).await {
                    tracing::error!(task_id = %next.task_id, error = %e, "failed to persist retry-pending state");
                }
                let delay = compute_retry_delay(&self.config);
                if let Err(e) = self.enqueue_delayed(&next, delay.as_secs() as i64).await {
                    tracing::error!(task_id = %next.task_id, error = %e, "failed to schedule failure retry");
                }
            }
            None => {
                if let Err(e) = self.persist_terminal(&task).await {
                    tracing::error!(task_id = %task.task_id, error = %e, "failed to persist terminal record");
                }
            }
        }
    }
}

/// Guarantees a task id is cleared from the processing set exactly once,
/// even if the loop iteration panics or returns early before calling
/// `finish()`. Mirrors the guaranteed-cleanup intent of an RAII semaphore
/// permit, adapted from a permit release to a processing-set membership
/// release.
struct ProcessingGuard {
    store: Arc<dyn inferq_store::Store>,
    task_id: String,
    defused: bool,
}

impl ProcessingGuard {
    fn new(store: Arc<dyn inferq_store::Store>, task_id: String) -> Self {
        Self {
            store,
            task_id,
            defused: false,
        }
    }

    /// Synchronously clears processing membership and defuses the drop-time
    /// fallback spawn.
    async fn finish(mut self) {
        self.defused = true;
        if let Err(e) = self.store.processing_remove(&self.task_id).await {
            tracing::error!(task_id = %self.task_id, error = %e, "failed to clear processing membership");
        }
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if self.defused {
            return;
        }
        let store = self.store.clone();
        let task_id = self.task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.processing_remove(&task_id).await {
                tracing::error!(
                    task_id = %task_id,
                    error = %e,
                    "failed to clear processing membership (drop fallback)"
                );
            }
        });
    }
}
