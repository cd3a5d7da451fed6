//! Lifecycle observer contract around enqueue/run/fail.
//!
//! Mirrors a reporter/no-op-reporter split: the core crate defines the trait
//! so application-specific behavior can be injected without the core
//! depending on it, with a no-op default implementation. Missing methods are
//! no-ops; hook errors are caught and logged by the caller, never propagated
//! into task outcomes.

use async_trait::async_trait;

use crate::error::HookError;
use crate::models::Task;

#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn before_worker_boot(&self) -> Result<(), HookError> {
        Ok(())
    }

    async fn after_worker_boot(&self) -> Result<(), HookError> {
        Ok(())
    }

    async fn before_worker_shutdown(&self) -> Result<(), HookError> {
        Ok(())
    }

    async fn after_worker_shutdown(&self) -> Result<(), HookError> {
        Ok(())
    }

    async fn before_enqueue(&self, _task: &Task) -> Result<(), HookError> {
        Ok(())
    }

    async fn after_enqueue(&self, _task: &Task) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_timeout(&self, _task: &Task) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_error(&self, _task: &Task, _error: &str) -> Result<(), HookError> {
        Ok(())
    }
}

/// No-op implementation used when the caller does not bind an observer.
pub struct NoOpLifecycleHooks;

#[async_trait]
impl LifecycleHooks for NoOpLifecycleHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;

    struct RecordingHooks {
        events: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LifecycleHooks for RecordingHooks {
        async fn before_enqueue(&self, _task: &Task) -> Result<(), HookError> {
            self.events.lock().await.push("before_enqueue".to_string());
            Ok(())
        }

        async fn on_error(&self, _task: &Task, error: &str) -> Result<(), HookError> {
            self.events.lock().await.push(format!("on_error:{error}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn noop_hooks_never_error() {
        let hooks = NoOpLifecycleHooks;
        let task = Task::new("noop", Payload::default(), None);
        assert!(hooks.before_enqueue(&task).await.is_ok());
        assert!(hooks.on_error(&task, "boom").await.is_ok());
    }

    #[tokio::test]
    async fn custom_hooks_observe_named_events() {
        let hooks = RecordingHooks {
            events: tokio::sync::Mutex::new(Vec::new()),
        };
        let task = Task::new("custom", Payload::default(), None);
        hooks.before_enqueue(&task).await.unwrap();
        hooks.on_error(&task, "boom").await.unwrap();
        let events = hooks.events.lock().await;
        assert_eq!(events.as_slice(), ["before_enqueue", "on_error:boom"]);
    }
}
