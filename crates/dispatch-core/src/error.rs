//! Crate-wide error taxonomy for the scheduling and dispatch engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy the dispatcher, executor and queue drive job lifecycle from.
///
/// Each variant maps to exactly one handling policy (retry vs. terminal vs. rejected)
/// and one HTTP status via [`Error::status_code`].
#[derive(Debug, thiserror::Error, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", content = "detail")]
pub enum Error {
    #[error("queue is full")]
    QueueFull,

    #[error("job {0} already present")]
    DuplicateId(Uuid),

    #[error("worker {0} not found")]
    WorkerNotFound(Uuid),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("execution deadline exceeded")]
    ExecutionTimeout,

    #[error("queue timeout")]
    QueueTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error: {0}")]
    RemoteError(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("invalid config field '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status this error should surface as from the adapter layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::QueueFull => 429,
            Error::DuplicateId(_) => 500,
            Error::WorkerNotFound(_) => 500,
            Error::JobNotFound(_) => 404,
            Error::ExecutionTimeout | Error::QueueTimeout => 504,
            Error::Transport(_) | Error::RemoteError(_) => 502,
            Error::Cancelled => 409,
            Error::InvalidConfig { .. } => 400,
            Error::Serialization(_) => 400,
            Error::Persistence(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Short machine-readable category, used in JSON error bodies and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Error::QueueFull => "queue_full",
            Error::DuplicateId(_) => "duplicate_id",
            Error::WorkerNotFound(_) => "worker_not_found",
            Error::JobNotFound(_) => "job_not_found",
            Error::ExecutionTimeout => "execution_timeout",
            Error::QueueTimeout => "queue_timeout",
            Error::Transport(_) => "transport",
            Error::RemoteError(_) => "remote_error",
            Error::Cancelled => "cancelled",
            Error::InvalidConfig { .. } => "invalid_config",
            Error::Serialization(_) => "serialization",
            Error::Persistence(_) => "persistence",
            Error::Other(_) => "other",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::ExecutionTimeout
        } else {
            Error::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_maps_to_429() {
        assert_eq!(Error::QueueFull.status_code(), 429);
        assert_eq!(Error::QueueFull.category(), "queue_full");
    }

    #[test]
    fn timeout_variants_map_to_504() {
        assert_eq!(Error::ExecutionTimeout.status_code(), 504);
        assert_eq!(Error::QueueTimeout.status_code(), 504);
    }

    #[test]
    fn invalid_config_carries_field() {
        let err = Error::InvalidConfig {
            field: "task_timeout".into(),
            message: "must be >= 10".into(),
        };
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("task_timeout"));
    }
}
