//! Typed engine configuration, loaded from the environment.
//!
//! Explicit fields, `env::var` reads with documented fallback defaults, no
//! implicit global state.

use std::env;

/// Heartbeat cadence for a running worker loop. Fixed, not configurable.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
/// Age past which the reaper evicts a registry entry.
pub const PRUNE_TIMEOUT_SECS: u64 = 300;
/// Cadence at which the worker loop invokes the reaper.
pub const PRUNE_CHECK_INTERVAL_SECS: u64 = 60;
/// Retention window for terminal task/result records.
pub const TASK_RESULT_RETENTION_SECS: u64 = 86_400;
/// Default wait budget for the stream result getter.
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 300;

/// Engine configuration: backing-store connection plus the tunables this
/// crate exposes (`requeue_threshold`, `delay_seconds`, retention windows).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub worker_id: String,
    pub webhook_url: Option<String>,
    pub requeue_threshold_secs: i64,
    pub delay_seconds: i64,
    pub task_history_retention_secs: i64,
    pub task_ttl_secs: i64,
    /// Directory for the rolling `ERROR`-level log file a running worker
    /// writes handler failures to (§4.4 step 9's "log to error file").
    pub error_log_dir: String,
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to
    /// documented defaults for anything unset. Reads a `.env` file first if
    /// present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            host: env::var("INFERQ_REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("INFERQ_REDIS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6379),
            db: env::var("INFERQ_REDIS_DB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            password: env::var("INFERQ_REDIS_PASSWORD").ok(),
            worker_id: env::var("INFERQ_WORKER_ID").unwrap_or_else(|_| {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown-worker".to_string())
            }),
            webhook_url: env::var("INFERQ_WEBHOOK_URL").ok(),
            requeue_threshold_secs: env::var("INFERQ_REQUEUE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(180),
            delay_seconds: env::var("INFERQ_DELAY_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            task_history_retention_secs: env::var("INFERQ_TASK_HISTORY_RETENTION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400),
            task_ttl_secs: env::var("INFERQ_TASK_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400),
            error_log_dir: env::var("INFERQ_ERROR_LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
        }
    }

    /// Builds a `redis://` connection string from the host/port/db/password fields.
    pub fn redis_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{host}:{port}/{db}",
                password = password,
                host = self.host,
                port = self.port,
                db = self.db
            ),
            None => format!("redis://{host}:{port}/{db}", host = self.host, port = self.port, db = self.db),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            worker_id: "unknown-worker".to_string(),
            webhook_url: None,
            requeue_threshold_secs: 180,
            delay_seconds: 30,
            task_history_retention_secs: 86_400,
            task_ttl_secs: 86_400,
            error_log_dir: "logs".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.requeue_threshold_secs, 180);
        assert_eq!(config.delay_seconds, 30);
        assert_eq!(config.task_history_retention_secs, 86_400);
        assert_eq!(config.task_ttl_secs, 86_400);
    }

    #[test]
    fn redis_url_without_password() {
        let config = EngineConfig {
            password: None,
            ..EngineConfig::default()
        };
        assert_eq!(config.redis_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn redis_url_with_password() {
        let config = EngineConfig {
            password: Some("secret".to_string()),
            ..EngineConfig::default()
        };
        assert_eq!(config.redis_url(), "redis://:secret@127.0.0.1:6379/0");
    }
}
