//! Retry/delay pipeline.
//!
//! Shape kept as a small free function, unit-tested in isolation, returning a
//! delay in seconds — the *formula* diverges deliberately from exponential
//! backoff: retry scheduling here uses the configured fixed `delay_seconds`
//! (default 30).

use std::time::Duration;

use chrono::Utc;
use inferq_core::{EngineConfig, Task};

use crate::engine::{store_err, Engine};

/// Fixed delay before a retried task becomes eligible for promotion back onto
/// the main queue.
pub fn compute_retry_delay(config: &EngineConfig) -> Duration {
    Duration::from_secs(config.delay_seconds.max(0) as u64)
}

impl Engine {
    /// Moves every delayed entry whose ready time has passed onto the front
    /// of the main queue. Front-push minimizes latency for tasks that have
    /// already waited out their delay.
    pub async fn promote_due_delayed(&self) -> Result<usize, inferq_core::EngineError> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let due = self.store.delayed_range_due(now).await.map_err(store_err)?;
        let mut promoted = 0;

        for json in due {
            self.store.queue_push_front(&json).await.map_err(store_err)?;
            self.store.delayed_remove(&json).await.map_err(store_err)?;
            if let Ok(task) = serde_json::from_str::<Task>(&json) {
                self.store
                    .queued_index_add(now, &task.task_id)
                    .await
                    .map_err(store_err)?;
            }
            promoted += 1;
        }

        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_uses_configured_seconds_not_exponential_backoff() {
        let config = EngineConfig {
            delay_seconds: 30,
            ..EngineConfig::default()
        };
        assert_eq!(compute_retry_delay(&config), Duration::from_secs(30));

        let config = EngineConfig {
            delay_seconds: 5,
            ..EngineConfig::default()
        };
        assert_eq!(compute_retry_delay(&config), Duration::from_secs(5));
    }
}
