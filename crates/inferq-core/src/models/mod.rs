pub mod task;
pub mod worker;

pub use task::{Payload, Task, TaskErrorDetail, TaskStatus};
pub use worker::{Progress, WorkerRegistration, WorkerState};
