//! Shared models, configuration, and error types for the inferq task queue.

pub mod config;
pub mod error;
pub mod hooks;
pub mod models;

pub use config::EngineConfig;
pub use error::{EngineError, EngineErrorKind, HandlerError, HookError};
pub use hooks::{LifecycleHooks, NoOpLifecycleHooks};
pub use models::{Payload, Progress, Task, TaskErrorDetail, TaskStatus, WorkerRegistration, WorkerState};
