//! The shared error taxonomy used across the Hydrogen core.
//!
//! Every public entry point in `hydrogen-connectors`, `hydrogen-pool`,
//! `hydrogen-dqm`, `hydrogen-migrations` and `hydrogen-auth` eventually
//! returns (or converts its local error into) [`Error`]. This is the only
//! error type allowed to reach a caller at the edge of the core.

use std::fmt;

use http::StatusCode;
use serde::Serialize;

/// Type alias with a default `Err` type of [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The taxonomy from the design's error handling section, boxed so `Error`
/// stays a single pointer wide on the stack.
pub struct Error {
    inner: Box<ErrorKind>,
}

/// The kinds of errors the core can produce, one per HTTP status class.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("too many requests")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("timed out")]
    Timeout,

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { inner: Box::new(kind) }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput(msg.into()))
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound(msg.into()))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict(msg.into()))
    }

    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self::new(ErrorKind::TooManyRequests { retry_after_secs })
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable(msg.into()))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(msg.into()))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner
    }

    /// Seconds the caller should wait before retrying, if this error carries one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match *self.inner {
            ErrorKind::TooManyRequests { retry_after_secs } => Some(retry_after_secs),
            _ => None,
        }
    }

    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match *self.inner {
            ErrorKind::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden(_) => StatusCode::FORBIDDEN,
            ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::Conflict(_) => StatusCode::CONFLICT,
            ErrorKind::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A machine-readable tag for the `error` field of the JSON envelope.
    pub fn tag(&self) -> &'static str {
        match *self.inner {
            ErrorKind::InvalidInput(_) => "invalid_input",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden(_) => "forbidden",
            ErrorKind::NotFound(_) => "not_found",
            ErrorKind::Conflict(_) => "conflict",
            ErrorKind::TooManyRequests { .. } => "too_many_requests",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable(_) => "unavailable",
            ErrorKind::Internal(_) => "internal",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.inner)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// JSON error envelope shape returned on the wire.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        ErrorBody {
            success: false,
            error: err.to_string(),
            retry_after: err.retry_after_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(Error::invalid_input("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::unauthorized().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::too_many_requests(900).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(Error::timeout().status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(Error::unavailable("x").status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::internal("x").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn retry_after_round_trips() {
        let err = Error::too_many_requests(900);
        assert_eq!(err.retry_after_secs(), Some(900));
        let body = ErrorBody::from(&err);
        assert_eq!(body.retry_after, Some(900));
    }
}
