use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task lifecycle status.
///
/// Transitions form a DAG: `Queued -> Processing -> {InProgress ->}? {Completed | Failed}`,
/// `Queued -> Cancelled`, `Processing -> Cancelled` (cooperative), `Queued -> Expired`
/// (reaper). The only backward transition is the stuck-task reaper's explicit
/// `Processing -> Queued`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "expired" => Ok(TaskStatus::Expired),
            _ => Err(anyhow::anyhow!("invalid task status: {}", s)),
        }
    }
}

impl TaskStatus {
    /// Whether moving from `self` to `next` is a legal transition per the status DAG.
    /// Used defensively at the store layer (debug-asserted) — the engine's own
    /// workflow logic is responsible for never attempting an illegal transition.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (*self, next) {
            (Queued, Processing) => true,
            (Queued, Cancelled) => true,
            (Queued, Expired) => true,
            (Processing, InProgress) => true,
            (Processing, Completed) => true,
            (Processing, Failed) => true,
            (Processing, Cancelled) => true,
            (Processing, Queued) => true, // reaper requeue
            (InProgress, Completed) => true,
            (InProgress, Failed) => true,
            (InProgress, Cancelled) => true,
            (same, other) => same == other,
        }
    }
}

/// The recognized-keys payload bag carried by a task.
///
/// `data` is the opaque user bag passed through to the handler unchanged;
/// `timeout`, `stream`, and `retries` are engine-recognized control fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub retries: u32,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            data: serde_json::Value::Null,
            timeout: None,
            stream: false,
            retries: 0,
        }
    }
}

/// Error detail attached to a task on failure: `{message, type, file, line, trace}`.
///
/// `file`/`line` are populated from a caller-supplied capture point where
/// available; Rust does not reconstruct exception-frame source locations for
/// an arbitrary `anyhow::Error` the way the source system's host language does,
/// so these are left `None` when no capture point was threaded through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl TaskErrorDetail {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            type_: "HandlerError".to_string(),
            file: None,
            line: None,
            trace: None,
        }
    }

    #[track_caller]
    pub fn captured(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            type_: "HandlerError".to_string(),
            file: Some(loc.file().to_string()),
            line: Some(loc.line()),
            trace: None,
        }
    }
}

/// A single unit of work: identity, payload, lifecycle timestamps, status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_name: String,
    pub payload: Payload,
    /// Immutable snapshot of `payload` taken at enqueue time, used to reconstruct
    /// retries without accumulating mutation on the live copy.
    pub original_payload: Payload,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(with = "unix_ts")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "unix_ts_opt", default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(with = "unix_ts_opt", default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "unix_ts_opt", default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskErrorDetail>,
    /// Caller metadata (e.g. user id), merged into the top-level stored record.
    #[serde(flatten, default, skip_serializing_if = "HashMap::is_empty")]
    pub additional_params: HashMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(task_name: impl Into<String>, payload: Payload, task_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            task_name: task_name.into(),
            original_payload: payload.clone(),
            payload,
            status: TaskStatus::Queued,
            result: None,
            created_at: now,
            queued_at: Some(now),
            started_at: None,
            finished_at: None,
            error: None,
            additional_params: HashMap::new(),
        }
    }

    pub fn is_stream(&self) -> bool {
        self.payload.stream
    }

    pub fn retries_remaining(&self) -> u32 {
        self.original_payload.retries
    }

    /// Builds the next retry attempt: fresh `payload` from `original_payload`,
    /// retry budget decremented by one, status reset to queued.
    pub fn next_retry_attempt(&self) -> Option<Task> {
        if self.original_payload.retries == 0 {
            return None;
        }
        let mut original = self.original_payload.clone();
        original.retries -= 1;
        let now = Utc::now();
        Some(Task {
            task_id: self.task_id.clone(),
            task_name: self.task_name.clone(),
            payload: original.clone(),
            original_payload: original,
            status: TaskStatus::Queued,
            result: None,
            created_at: self.created_at,
            queued_at: Some(now),
            started_at: None,
            finished_at: None,
            error: None,
            additional_params: self.additional_params.clone(),
        })
    }

    /// Builds the carried-over attempt for an explicit retry marker: `original_payload`
    /// unchanged, retries NOT decremented (distinct from a failure-driven retry).
    pub fn next_explicit_retry(&self) -> Task {
        let now = Utc::now();
        Task {
            task_id: self.task_id.clone(),
            task_name: self.task_name.clone(),
            payload: self.original_payload.clone(),
            original_payload: self.original_payload.clone(),
            status: TaskStatus::Queued,
            result: None,
            created_at: self.created_at,
            queued_at: Some(now),
            started_at: None,
            finished_at: None,
            error: None,
            additional_params: self.additional_params.clone(),
        }
    }
}

/// `DateTime<Utc> <-> fractional seconds since epoch`, matching the wire
/// schema's timestamp convention.
mod unix_ts {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(dt.timestamp_millis() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Utc.timestamp_millis_opt((secs * 1000.0).round() as i64)
            .single()
            .ok_or_else(|| serde::de::Error::custom("invalid unix timestamp"))
    }
}

mod unix_ts_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match dt {
            Some(dt) => super::unix_ts::serialize(dt, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<f64> = Option::deserialize(deserializer)?;
        match value {
            Some(secs) => {
                let dt = chrono::Utc
                    .timestamp_millis_opt((secs * 1000.0).round() as i64)
                    .single()
                    .ok_or_else(|| serde::de::Error::custom("invalid unix timestamp"))?;
                Ok(Some(dt))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_and_parse_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::Expired,
        ] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn transition_dag_forbids_backwards_jumps() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Processing));
    }

    #[test]
    fn task_serialization_round_trip_is_identity() {
        let task = Task::new(
            "add",
            Payload {
                data: serde_json::json!({"a": 1, "b": 2}),
                timeout: Some(30),
                stream: false,
                retries: 2,
            },
            Some("fixed-id".to_string()),
        );
        let json = serde_json::to_string(&task).unwrap();
        let round_tripped: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped.task_id, task.task_id);
        assert_eq!(round_tripped.task_name, task.task_name);
        assert_eq!(round_tripped.status, task.status);
        assert_eq!(round_tripped.payload.retries, task.payload.retries);
    }

    #[test]
    fn retry_attempt_decrements_budget_and_resets_from_original() {
        let mut task = Task::new(
            "flaky",
            Payload {
                data: serde_json::json!({}),
                timeout: None,
                stream: false,
                retries: 2,
            },
            None,
        );
        task.payload.data = serde_json::json!({"mutated": true});
        let retried = task.next_retry_attempt().unwrap();
        assert_eq!(retried.original_payload.retries, 1);
        assert_eq!(retried.payload.data, serde_json::json!({}));
        assert_eq!(retried.status, TaskStatus::Queued);
    }

    #[test]
    fn retry_budget_zero_yields_no_attempt() {
        let task = Task::new(
            "flaky",
            Payload {
                data: serde_json::json!({}),
                timeout: None,
                stream: false,
                retries: 0,
            },
            None,
        );
        assert!(task.next_retry_attempt().is_none());
    }

    #[test]
    fn explicit_retry_does_not_decrement_budget() {
        let task = Task::new(
            "flaky",
            Payload {
                data: serde_json::json!({}),
                timeout: None,
                stream: false,
                retries: 3,
            },
            None,
        );
        let retried = task.next_explicit_retry();
        assert_eq!(retried.original_payload.retries, 3);
    }
}
