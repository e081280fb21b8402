use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by engine operations and backend calls.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The backend returned a non-success HTTP status.
    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The request did not complete within its deadline.
    #[error("Request timed out")]
    Timeout,

    /// The backend answered `success: false`.
    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    /// The response was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An aspect ratio or resolution that cannot be resolved to pixels.
    #[error("Invalid ratio: {0}")]
    InvalidRatio(String),

    /// A generation request that fails local validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The task has no server job yet.
    #[error("Task is not ready: {0}")]
    NotReady(String),

    /// The task is in a state that does not allow the operation.
    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Other(err.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a submission failed, as surfaced on the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum SubmitFailure {
    Timeout,
    Unreachable,
    Server { status: u16 },
    Rejected(String),
    Other(String),
}

impl SubmitFailure {
    /// Map an engine error onto the user-facing failure classes.
    pub fn classify(err: &EngineError) -> Self {
        match err {
            EngineError::Timeout => SubmitFailure::Timeout,
            EngineError::Network { source, .. } if source.is_timeout() => SubmitFailure::Timeout,
            // the server answered, just not with something we can read
            EngineError::Network { source, .. } if source.is_decode() => {
                SubmitFailure::Other(err.to_string())
            }
            EngineError::Network { .. } => SubmitFailure::Unreachable,
            EngineError::Http { status, .. } => SubmitFailure::Server { status: *status },
            EngineError::Rejected(msg) => SubmitFailure::Rejected(msg.clone()),
            other => SubmitFailure::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for SubmitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitFailure::Timeout => write!(f, "request timed out"),
            SubmitFailure::Unreachable => write!(f, "cannot reach the server"),
            SubmitFailure::Server { status } => write!(f, "server returned HTTP {}", status),
            SubmitFailure::Rejected(msg) if msg.is_empty() => write!(f, "request rejected"),
            SubmitFailure::Rejected(msg) | SubmitFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}
