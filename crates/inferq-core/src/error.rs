//! Error taxonomy for the engine boundary.
//!
//! Follows an `AppError`/`ErrorMetadata` split paired with a recoverable/
//! unrecoverable framing for task-level failures, narrowed to four observable
//! kinds.

use std::fmt;

/// The four observable error categories producers and handlers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Producer exceeded its wait budget, or a handler exceeded its declared deadline.
    Timeout,
    /// Handler failed, task not allowed on this worker, or a cancelled task was
    /// observed by a consumer.
    Processing,
    /// Handler explicitly requested a retry (control-flow marker, not a fault).
    Retry,
    /// Backing-store call failed.
    Store,
}

/// Top-level engine error, classified by [`EngineErrorKind`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("retry requested")]
    Retry,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            EngineError::Timeout(_) => EngineErrorKind::Timeout,
            EngineError::Processing(_) => EngineErrorKind::Processing,
            EngineError::Retry => EngineErrorKind::Retry,
            EngineError::Store(_) => EngineErrorKind::Store,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        EngineError::Timeout(message.into())
    }

    pub fn processing(message: impl Into<String>) -> Self {
        EngineError::Processing(message.into())
    }
}

/// The outcome of invoking a registered handler.
///
/// A dedicated sentinel variant for the retry marker (rather than a generic
/// error) preserves "retries not decremented on explicit request".
#[derive(Debug)]
pub enum HandlerError {
    Retry,
    Failed(anyhow::Error),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Retry => write!(f, "retry requested"),
            HandlerError::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        HandlerError::Failed(e)
    }
}

/// Error raised by a lifecycle hook. Hook errors are caught and logged by the
/// caller (`tracing::warn!`) — they never affect task outcomes.
#[derive(Debug, thiserror::Error)]
#[error("lifecycle hook error: {0}")]
pub struct HookError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_classification() {
        assert_eq!(EngineError::timeout("x").kind(), EngineErrorKind::Timeout);
        assert_eq!(
            EngineError::processing("x").kind(),
            EngineErrorKind::Processing
        );
        assert_eq!(EngineError::Retry.kind(), EngineErrorKind::Retry);
        assert_eq!(
            EngineError::Store(anyhow::anyhow!("x")).kind(),
            EngineErrorKind::Store
        );
    }
}
