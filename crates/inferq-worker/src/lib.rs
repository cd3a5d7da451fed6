//! Worker loop, Producer API, reaper, retry/delay pipeline, and stream
//! channel for the inferq task queue.

pub mod engine;
pub mod handler;
pub mod reaper;
pub mod retry;
pub mod stream;
pub mod worker_loop;

pub use engine::{Engine, FailedTaskSummary, Stats, TaskNameStats};
pub use handler::{Handler, HandlerOptions, RegisteredHandler, StreamEmitter};
pub use retry::compute_retry_delay;
pub use stream::get_stream;
