//! Runtime error taxonomy shared by the orchestrator and the runner

use std::time::Duration;

use thiserror::Error;

/// A step handler's own failure
///
/// Recorded against the step and gated by its criticality; never fatal to
/// the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// The plan store or queue could not be reached or refused a write
///
/// Fatal to the current execution attempt. A rejected write leaves the step
/// in its previously recorded state, so the job can be retried safely.
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The caller no longer owns the job (lease lost or job cancelled)
    #[error("ownership conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl InfrastructureError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
