//! End-to-end scenarios driving `Engine` against `FakeStore`: no live Redis
//! required. Each test mirrors one of the concrete scenarios this queue's
//! contract is built around — arithmetic, streaming, retry budgets,
//! cancellation, the stuck-task reaper, and stats aggregation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use futures_util::StreamExt;
use inferq_core::{EngineConfig, HandlerError, Payload, Task, TaskErrorDetail, TaskStatus};
use inferq_store::{FakeStore, Store};
use inferq_worker::engine::Engine;
use inferq_worker::handler::{Handler, HandlerOptions};
use inferq_worker::stream::get_stream;
use serde_json::json;

fn fast_retry_config() -> EngineConfig {
    EngineConfig {
        delay_seconds: 1,
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn arithmetic_task_completes_with_summed_result() {
    let store = Arc::new(FakeStore::new());
    let engine = Engine::new(store, EngineConfig::default());

    engine
        .register_task(
            "add",
            Handler::unary(|data| async move {
                let a = data["a"].as_i64().unwrap_or(0);
                let b = data["b"].as_i64().unwrap_or(0);
                Ok(json!({ "sum": a + b }))
            }),
            HandlerOptions::default(),
        )
        .await
        .unwrap();

    let worker = tokio::spawn(engine.clone().run());

    let task = engine
        .enqueue("add", json!({ "a": 5, "b": 3 }), None, None)
        .await
        .unwrap();

    let finished = engine
        .wait_for_result(&task.task_id, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.result, Some(json!({ "sum": 8 })));

    engine.stop();
    worker.await.unwrap();
}

#[tokio::test]
async fn streaming_task_yields_words_in_order() {
    let store = Arc::new(FakeStore::new());
    let engine = Engine::new(store, EngineConfig::default());

    engine
        .register_task(
            "stream_words",
            Handler::streaming(|_data, emitter| async move {
                for word in ["The", "quick", "brown", "fox"] {
                    emitter.emit(json!(word)).await?;
                }
                Ok(())
            }),
            HandlerOptions {
                stream: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let worker = tokio::spawn(engine.clone().run());

    let task = engine
        .enqueue("stream_words", json!({}), None, None)
        .await
        .unwrap();

    let stream = get_stream(&engine, &task.task_id, Duration::from_secs(10));
    tokio::pin!(stream);
    let mut words = Vec::new();
    while let Some(item) = stream.next().await {
        words.push(item.unwrap().as_str().unwrap().to_string());
    }
    assert_eq!(words, vec!["The", "quick", "brown", "fox"]);

    let finished = engine.details(&task.task_id).await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);

    engine.stop();
    worker.await.unwrap();
}

#[tokio::test]
async fn flaky_task_retries_then_succeeds() {
    let store = Arc::new(FakeStore::new());
    let engine = Engine::new(store, fast_retry_config());

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_for_handler = attempts.clone();

    engine
        .register_task(
            "flaky",
            Handler::unary(move |_data| {
                let attempts = attempts_for_handler.clone();
                async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 3 {
                        Err(HandlerError::Failed(anyhow::anyhow!("boom")))
                    } else {
                        Ok(json!("ok"))
                    }
                }
            }),
            HandlerOptions {
                retries: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let worker = tokio::spawn(engine.clone().run());

    let task = engine.enqueue("flaky", json!({}), None, None).await.unwrap();

    let finished = engine
        .wait_for_result(&task.task_id, Duration::from_secs(15))
        .await
        .unwrap();

    assert_eq!(finished.result, Some(json!("ok")));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    engine.stop();
    worker.await.unwrap();
}

#[tokio::test]
async fn cancelling_queued_task_prevents_future_claim() {
    let store = Arc::new(FakeStore::new());
    let engine = Engine::new(store, EngineConfig::default());

    let task = engine.enqueue("slow", json!({}), None, None).await.unwrap();

    let cancelled = engine.cancel(&task.task_id).await.unwrap();
    assert!(cancelled);

    assert_eq!(
        engine.status(&task.task_id).await.unwrap(),
        Some(TaskStatus::Cancelled)
    );

    let queued = engine.all_queued().await.unwrap();
    assert!(!queued.iter().any(|t| t.task_id == task.task_id));
}

#[tokio::test]
async fn stuck_task_reaper_requeues_into_main_queue() {
    let store = Arc::new(FakeStore::new());
    let engine = Engine::new(store.clone(), EngineConfig::default());

    let mut task = Task::new("slow", Payload::default(), None);
    task.status = TaskStatus::Processing;
    task.started_at = Some(Utc::now() - ChronoDuration::seconds(300));
    let raw = serde_json::to_string(&task).unwrap();
    store
        .set_task(&task.task_id, &raw, Duration::from_secs(3600))
        .await
        .unwrap();
    store.processing_add(&task.task_id).await.unwrap();

    let requeued = engine.requeue_stuck_tasks().await.unwrap();
    assert_eq!(requeued, 1);

    let snapshot = engine.all_queued().await.unwrap();
    assert!(snapshot.iter().any(|t| t.task_id == task.task_id));
    let requeued_task = snapshot.iter().find(|t| t.task_id == task.task_id).unwrap();
    assert_eq!(requeued_task.status, TaskStatus::Queued);

    let processing = engine.processing().await.unwrap();
    assert!(!processing.contains(&task.task_id));
}

#[tokio::test]
async fn stats_aggregates_by_status_and_task_name() {
    let store = Arc::new(FakeStore::new());
    let engine = Engine::new(store.clone(), EngineConfig::default());

    let mut completed_a1 = Task::new("A", Payload::default(), None);
    completed_a1.status = TaskStatus::Completed;
    seed_history(&store, &completed_a1).await;

    let mut completed_a2 = Task::new("A", Payload::default(), None);
    completed_a2.status = TaskStatus::Completed;
    seed_history(&store, &completed_a2).await;

    let mut failed_a = Task::new("A", Payload::default(), None);
    failed_a.status = TaskStatus::Failed;
    failed_a.error = Some(TaskErrorDetail::from_message("boom"));
    seed_history(&store, &failed_a).await;

    let mut completed_b = Task::new("B", Payload::default(), None);
    completed_b.status = TaskStatus::Completed;
    seed_history(&store, &completed_b).await;

    let stats = engine.stats().await.unwrap();

    assert_eq!(stats.total, 4);
    assert_eq!(stats.by_status["completed"], 3);
    assert_eq!(stats.by_status["failed"], 1);

    let a_stats = &stats.by_task_name["A"];
    assert_eq!(a_stats.total, 3);
    assert_eq!(a_stats.completed, 2);
    assert_eq!(a_stats.failed, 1);

    assert_eq!(stats.failed_tasks.len(), 1);
    assert_eq!(stats.failed_tasks[0].error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn progress_reports_are_clamped_and_readable() {
    let store = Arc::new(FakeStore::new());
    let engine = Engine::new(store, EngineConfig::default());

    let task = engine.enqueue("slow", json!({}), None, None).await.unwrap();

    engine
        .report_progress(&task.task_id, 1.4, Some("almost there".to_string()))
        .await
        .unwrap();

    let progress = engine.get_progress(&task.task_id).await.unwrap().unwrap();
    assert_eq!(progress.progress, 1.0);
    assert_eq!(progress.message.as_deref(), Some("almost there"));
}

#[tokio::test]
async fn check_cancellation_reflects_cancel_flag() {
    let store = Arc::new(FakeStore::new());
    let engine = Engine::new(store, EngineConfig::default());

    let task = engine.enqueue("slow", json!({}), None, None).await.unwrap();
    assert!(!engine.check_cancellation(&task.task_id).await.unwrap());

    engine.cancel(&task.task_id).await.unwrap();
    assert!(engine.check_cancellation(&task.task_id).await.unwrap());
}

async fn seed_history(store: &Arc<FakeStore>, task: &Task) {
    let raw = serde_json::to_string(task).unwrap();
    store
        .set_task(&task.task_id, &raw, Duration::from_secs(3600))
        .await
        .unwrap();
    store
        .history_add(task.created_at.timestamp_millis() as f64 / 1000.0, &task.task_id)
        .await
        .unwrap();
}
