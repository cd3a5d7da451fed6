//! Reaper: stuck-task requeue, stale-worker eviction, and expiry. Run
//! periodically from the worker loop's own tick — kept *inline* in the
//! single-threaded cooperative loop rather than a separately spawned task,
//! since this crate's concurrency model keeps exactly one handler in flight
//! per instance.

use chrono::{Duration as ChronoDuration, Utc};
use inferq_core::{Task, TaskStatus};

use crate::engine::{store_err, Engine};

impl Engine {
    /// Removes registry entries whose `last_heartbeat` is older than
    /// `PRUNE_TIMEOUT` (300s).
    pub async fn evict_stale_workers(&self) -> Result<usize, inferq_core::EngineError> {
        let prune_timeout = ChronoDuration::seconds(
            inferq_core::config::PRUNE_TIMEOUT_SECS as i64,
        );
        let all = self.store.workers_all().await.map_err(store_err)?;
        let mut evicted = 0;
        for (worker_id, json) in all {
            let Ok(registration) = serde_json::from_str::<inferq_core::WorkerRegistration>(&json)
            else {
                tracing::warn!(worker_id, "failed to decode worker registration, evicting");
                self.store.workers_del(&worker_id).await.map_err(store_err)?;
                continue;
            };
            if registration.is_stale(prune_timeout) {
                tracing::info!(worker_id, "evicting stale worker registration");
                self.store.workers_del(&worker_id).await.map_err(store_err)?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Requeues tasks stuck in `processing` past `requeue_threshold`; removes
    /// orphaned processing-set members whose task record is gone entirely.
    #[tracing::instrument(skip(self))]
    pub async fn requeue_stuck_tasks(&self) -> Result<usize, inferq_core::EngineError> {
        let threshold = ChronoDuration::seconds(self.config.requeue_threshold_secs);
        let members = self.store.processing_members().await.map_err(store_err)?;
        let mut requeued = 0;

        for task_id in members {
            let json = match self.store.get_task(&task_id).await.map_err(store_err)? {
                Some(json) => json,
                None => {
                    tracing::warn!(task_id, "orphaned processing-set member, removing");
                    self.store.processing_remove(&task_id).await.map_err(store_err)?;
                    continue;
                }
            };

            let mut task: Task = match serde_json::from_str(&json) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(task_id, error = %e, "failed to decode task record, removing from processing set");
                    self.store.processing_remove(&task_id).await.map_err(store_err)?;
                    continue;
                }
            };

            let Some(started_at) = task.started_at else {
                continue;
            };
            if Utc::now() - started_at <= threshold {
                continue;
            }

            tracing::info!(task_id = %task.task_id, "requeueing stuck task");
            task.status = TaskStatus::Queued;
            task.queued_at = Some(Utc::now());
            task.started_at = None;
            let requeued_json = serde_json::to_string(&task).map_err(|e| inferq_core::EngineError::Store(e.into()))?;
            self.store.queue_push(&requeued_json).await.map_err(store_err)?;
            self.persist_task(&task).await?;
            self.store.processing_remove(&task_id).await.map_err(store_err)?;
            requeued += 1;
        }

        Ok(requeued)
    }

    /// Deletes result and task records whose terminal timestamp is older than
    /// `TASK_RESULT_RETENTION` (86400s).
    pub async fn prune_old_terminal_records(&self) -> Result<usize, inferq_core::EngineError> {
        let retention = ChronoDuration::seconds(
            inferq_core::config::TASK_RESULT_RETENTION_SECS as i64,
        );
        let ids = self.store.history_all_ids().await.map_err(store_err)?;
        let mut pruned = 0;

        for id in ids {
            let Some(json) = self.store.get_task(&id).await.map_err(store_err)? else {
                continue;
            };
            let Ok(task) = serde_json::from_str::<Task>(&json) else {
                continue;
            };
            if !matches!(
                task.status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Expired
            ) {
                continue;
            }
            let terminal_at = task.finished_at.or(task.started_at);
            let Some(terminal_at) = terminal_at else { continue };
            if Utc::now() - terminal_at > retention {
                self.store.del_result(&id).await.map_err(store_err)?;
                self.store.del_task(&id).await.map_err(store_err)?;
                pruned += 1;
            }
        }

        Ok(pruned)
    }

    /// Walks the main queue and drops tasks whose `created_at` is older than
    /// the configured task TTL, transitioning them to `expired` in history.
    pub async fn cleanup_expired_tasks(&self) -> Result<usize, inferq_core::EngineError> {
        let ttl = ChronoDuration::seconds(self.config.task_ttl_secs);
        let snapshot = self.store.queue_snapshot().await.map_err(store_err)?;
        let mut expired = 0;

        for entry in snapshot {
            let Ok(mut task) = serde_json::from_str::<Task>(&entry) else {
                continue;
            };
            if Utc::now() - task.created_at <= ttl {
                continue;
            }
            tracing::info!(task_id = %task.task_id, "expiring task past task_ttl");
            self.store.queue_remove_one(&entry).await.map_err(store_err)?;
            self.store.queued_index_remove(&task.task_id).await.map_err(store_err)?;
            task.status = TaskStatus::Expired;
            task.finished_at = Some(Utc::now());
            self.persist_task(&task).await?;
            expired += 1;
        }

        Ok(expired)
    }

    /// Runs all reaper duties once. Called from the worker loop's periodic
    /// tick (`PRUNE_CHECK_INTERVAL`, 60s).
    #[tracing::instrument(skip(self))]
    pub async fn run_reaper(&self) {
        if let Err(e) = self.evict_stale_workers().await {
            tracing::error!(error = %e, "reaper: evict_stale_workers failed");
        }
        if let Err(e) = self.requeue_stuck_tasks().await {
            tracing::error!(error = %e, "reaper: requeue_stuck_tasks failed");
        }
        if let Err(e) = self.prune_old_terminal_records().await {
            tracing::error!(error = %e, "reaper: prune_old_terminal_records failed");
        }
        if let Err(e) = self.cleanup_expired_tasks().await {
            tracing::error!(error = %e, "reaper: cleanup_expired_tasks failed");
        }
    }
}
