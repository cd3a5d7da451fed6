//! Consumer-side stream channel: `get_stream` yields a lazy sequence of
//! decoded values as a `Stream`, the idiomatic async-Rust realization of a
//! generator, using `async-stream`'s `try_stream!` the way other queue/worker
//! crates do.

use std::time::{Duration, Instant};

use async_stream::try_stream;
use futures_core::stream::Stream;
use inferq_core::{EngineError, TaskStatus};
use serde_json::Value;

use crate::engine::{store_err, Engine};

/// Reads a task's stream log from the beginning, yielding each decoded
/// `result` value in order. Consults the terminal record after every batch:
/// `completed` ends the stream, `failed` fails it with a processing-kind
/// error, `cancelled` ends it silently. `timeout` bounds the whole read, not
/// any single batch.
pub fn get_stream<'a>(
    engine: &'a Engine,
    task_id: &'a str,
    timeout: Duration,
) -> impl Stream<Item = Result<Value, EngineError>> + 'a {
    try_stream! {
        let deadline = Instant::now() + timeout;
        let mut from_id = "0-0".to_string();

        loop {
            if Instant::now() >= deadline {
                Err(EngineError::timeout(format!(
                    "stream for task {task_id} did not complete within the wait budget"
                )))?;
            }

            let entries = engine
                .store
                .stream_read(task_id, &from_id, 10, Duration::from_secs(1))
                .await
                .map_err(store_err)?;

            for entry in &entries {
                from_id = entry.id.clone();
                let value: Value = serde_json::from_str(&entry.result_json)
                    .map_err(|e| EngineError::Store(e.into()))?;
                yield value;
            }

            match engine.details(task_id).await? {
                Some(task) if task.status == TaskStatus::Completed => return,
                Some(task) if task.status == TaskStatus::Failed => {
                    Err(EngineError::processing(
                        task.error
                            .map(|e| e.message)
                            .unwrap_or_else(|| "task failed".to_string()),
                    ))?;
                }
                Some(task) if task.status == TaskStatus::Cancelled => return,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::StreamExt;
    use inferq_core::{EngineConfig, Payload, Task, TaskStatus};
    use inferq_store::{FakeStore, Store};

    use super::*;
    use crate::engine::Engine;

    #[tokio::test]
    async fn yields_entries_in_order_then_completes() {
        let store = Arc::new(FakeStore::new());
        let engine = Engine::new(store.clone(), EngineConfig::default());

        let task = Task::new("stream_words", Payload::default(), None);
        let json = serde_json::to_string(&task).unwrap();
        store.set_task(&task.task_id, &json, Duration::from_secs(60)).await.unwrap();

        for word in ["The", "quick", "brown", "fox"] {
            store
                .stream_append(&task.task_id, &serde_json::to_string(word).unwrap())
                .await
                .unwrap();
        }

        let mut completed = task.clone();
        completed.status = TaskStatus::Completed;
        let completed_json = serde_json::to_string(&completed).unwrap();
        store
            .set_task(&task.task_id, &completed_json, Duration::from_secs(60))
            .await
            .unwrap();

        let stream = get_stream(&engine, &task.task_id, Duration::from_secs(5));
        tokio::pin!(stream);
        let mut words = Vec::new();
        while let Some(item) = stream.next().await {
            words.push(item.unwrap().as_str().unwrap().to_string());
        }
        assert_eq!(words, vec!["The", "quick", "brown", "fox"]);
    }

    #[tokio::test]
    async fn fails_with_processing_kind_on_failed_task() {
        let store = Arc::new(FakeStore::new());
        let engine = Engine::new(store.clone(), EngineConfig::default());

        let mut task = Task::new("flaky_stream", Payload::default(), None);
        task.status = TaskStatus::Failed;
        task.error = Some(inferq_core::TaskErrorDetail::from_message("boom"));
        let json = serde_json::to_string(&task).unwrap();
        store.set_task(&task.task_id, &json, Duration::from_secs(60)).await.unwrap();

        let stream = get_stream(&engine, &task.task_id, Duration::from_secs(5));
        tokio::pin!(stream);
        let mut saw_error = false;
        while let Some(item) = stream.next().await {
            if let Err(e) = item {
                assert_eq!(e.kind(), inferq_core::EngineErrorKind::Processing);
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
