//! Errors an [`crate::EngineAdapter`] can produce.

use hydrogen_errors::{Error as CoreError, ErrorKind};

/// Local error type for the connector layer, converted into the shared
/// taxonomy by callers (the pool manager retries `Disconnected` once before
/// surfacing `Unavailable`).
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("connection lost")]
    Disconnected,

    #[error("query failed: {0}")]
    Query(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid connection parameters: {0}")]
    InvalidParams(String),
}

impl From<AdapterError> for CoreError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Disconnected => ErrorKind::Unavailable("connection lost".into()).into(),
            AdapterError::Query(msg) => ErrorKind::Internal(msg).into(),
            AdapterError::Unsupported(msg) => ErrorKind::InvalidInput(msg).into(),
            AdapterError::InvalidParams(msg) => ErrorKind::InvalidInput(msg).into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
