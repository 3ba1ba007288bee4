//! Error types for agent-runner

use thiserror::Error;

/// Result type alias for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors raised while asking the agent worker for the next step
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The worker could not be reached
    #[error("Worker request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The worker answered with a non-success status
    #[error("Worker returned status {status}: {body}")]
    WorkerStatus { status: u16, body: String },

    /// The worker answered with something that is not a step result
    #[error("Invalid worker response: {message}")]
    InvalidResponse { message: String },

    /// Execution timeout
    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Execution failed
    #[error("Execution failed: {message}")]
    ExecutionFailed { message: String },
}

impl ExecutorError {
    /// Create an InvalidResponse error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create an ExecutionFailed error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }
}

impl From<ExecutorError> for assistants_core::Error {
    fn from(err: ExecutorError) -> Self {
        assistants_core::Error::Executor(err.to_string())
    }
}
