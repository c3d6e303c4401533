//! Error types for the courier.

use thiserror::Error;

/// Main error type for courier operations.
///
/// Only construction-time and connect-time failures surface through this
/// type. Delivery and checkpoint failures are handled in the background and
/// reported through logs (see [`TransportError`] and [`CheckpointError`]).
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Job queue is shut down")]
    JobQueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CourierError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CourierError::Configuration(msg.into())
    }
}

impl From<rusqlite::Error> for CourierError {
    fn from(e: rusqlite::Error) -> Self {
        CourierError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(e: serde_json::Error) -> Self {
        CourierError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CourierError {
    fn from(e: toml::de::Error) -> Self {
        CourierError::Configuration(e.to_string())
    }
}

/// Failure to hand an event to a remote listener.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Listener answered with status {0}")]
    Status(u16),

    #[error("Could not encode event: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => TransportError::Status(status.as_u16()),
            None => TransportError::Request(e.to_string()),
        }
    }
}

/// Failure of a passive WAL checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Another operation holds a lock on the database. Expected under write load.
    #[error("Database is locked")]
    Locked,

    /// The checkpoint could not complete because readers or writers were active.
    #[error("Checkpoint was blocked by concurrent activity")]
    Busy,

    #[error("Checkpoint failed ({code}): {message}")]
    Failed { code: i32, message: String },
}

impl CheckpointError {
    /// Whether this failure is routine contention rather than a real problem.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckpointError::Locked)
    }
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(err, msg) => match err.code {
                rusqlite::ErrorCode::DatabaseLocked => CheckpointError::Locked,
                _ => CheckpointError::Failed {
                    code: err.extended_code,
                    message: msg.unwrap_or_else(|| err.to_string()),
                },
            },
            other => CheckpointError::Failed {
                code: -1,
                message: other.to_string(),
            },
        }
    }
}

/// Result type for courier operations.
pub type Result<T> = std::result::Result<T, CourierError>;
