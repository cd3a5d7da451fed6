use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-process status advertised by a worker registration.
///
/// Stays a scalar (idle/busy) rather than a count because this crate keeps
/// the per-instance concurrency model at exactly one handler in flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
}

/// A registered worker: identity, advertised capabilities, liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub allowed_tasks: Vec<String>,
    pub status: WorkerState,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<serde_json::Value>,
}

impl WorkerRegistration {
    pub fn new(worker_id: impl Into<String>, allowed_tasks: Vec<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            allowed_tasks,
            status: WorkerState::Idle,
            last_heartbeat: Utc::now(),
            system_info: None,
        }
    }

    pub fn is_stale(&self, prune_timeout: chrono::Duration) -> bool {
        Utc::now() - self.last_heartbeat > prune_timeout
    }
}

/// Sidecar progress record: `{progress in [0,1], message?, updated_at}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Progress {
    /// Constructs a progress record, clamping `progress` into `[0, 1]`.
    pub fn new(progress: f64, message: Option<String>) -> Self {
        Self {
            progress: progress.clamp(0.0, 1.0),
            message,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_always_clamped() {
        assert_eq!(Progress::new(-0.5, None).progress, 0.0);
        assert_eq!(Progress::new(1.5, None).progress, 1.0);
        assert_eq!(Progress::new(0.42, None).progress, 0.42);
    }

    #[test]
    fn stale_worker_detection_uses_prune_timeout() {
        let mut worker = WorkerRegistration::new("w1", vec!["add".to_string()]);
        worker.last_heartbeat = Utc::now() - chrono::Duration::seconds(301);
        assert!(worker.is_stale(chrono::Duration::seconds(300)));
        worker.last_heartbeat = Utc::now();
        assert!(!worker.is_stale(chrono::Duration::seconds(300)));
    }
}
