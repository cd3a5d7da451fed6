//! Stable backing-store key layout. Dashboards and other consumers rely on
//! these names; do not rename.

pub const QUEUE: &str = "ml_tasks";
pub const QUEUED_INDEX: &str = "queued_requests";
pub const DELAYED: &str = "delayed_tasks";
pub const PROCESSING: &str = "processing_tasks";
pub const HISTORY_INDEX: &str = "task_history";
pub const WORKERS: &str = "servers";

pub fn task(id: &str) -> String {
    format!("task:{id}")
}

pub fn task_result(id: &str) -> String {
    format!("task_result:{id}")
}

pub fn task_stream(id: &str) -> String {
    format!("task_stream:{id}")
}

pub fn history_entry(id: &str) -> String {
    format!("task_history:{id}")
}

pub fn cancelled(id: &str) -> String {
    format!("task:{id}:cancelled")
}

pub fn progress(id: &str) -> String {
    format!("task:{id}:progress")
}
