// Error types shared by the storage, button and recording layers

use thiserror::Error;

/// Failure categories surfaced by slitcam operations
#[derive(Debug, Error)]
pub enum RecorderError {
    /// A required capability (capture tool, input line backend) is missing
    #[error("{0}")]
    CapabilityUnavailable(String),

    /// The service cannot start because a precondition is not met
    #[error("{0}")]
    PreconditionFailed(String),

    /// Process start/stop or conversion failed during an active session
    #[error("{0}")]
    Transient(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::CapabilityUnavailable(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Process exit code used by the CLI for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RecorderError::PreconditionFailed(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
