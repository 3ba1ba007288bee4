//! Error types for the core library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Incomplete tool output submission: {0}")]
    IncompleteSubmission(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Deadline expired: {0}")]
    ExpiredDeadline(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &str, id: &str) -> Self {
        Self::NotFound(format!("{} {}", kind, id))
    }

    /// Stable, lowercase name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidState(_) => "invalid_state",
            Self::IncompleteSubmission(_) => "incomplete_submission",
            Self::Executor(_) => "executor_error",
            Self::ExpiredDeadline(_) => "expired_deadline",
            Self::InvalidInput(_) => "invalid_input",
            Self::Serialization(_) => "serialization",
        }
    }
}
