//! Ambient infrastructure: telemetry initialization and the best-effort
//! webhook sink, kept separate from the core engine.

pub mod telemetry;
pub mod webhook;

pub use telemetry::{init_tracing, init_tracing_with_error_log};
pub use webhook::{NoOpWebhookSink, ReqwestWebhookSink, WebhookSink};
