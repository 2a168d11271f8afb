//! Client error types.

use cushion_session::DatabaseError;
use reqwest::StatusCode;
use thiserror::Error;

use crate::types::ErrorResponse;

/// Errors raised while building a [`crate::CouchDatabase`].
///
/// Request failures are reported as [`DatabaseError`] through the
/// `DocumentDatabase` trait instead.
#[derive(Debug, Error)]
pub enum CouchError {
    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be created.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for client construction.
pub type Result<T> = std::result::Result<T, CouchError>;

/// Map a failed request (no response) to a database error.
pub(crate) fn transport_error(err: reqwest::Error) -> DatabaseError {
    if err.is_decode() {
        DatabaseError::Malformed(err.to_string())
    } else {
        DatabaseError::Unavailable(err.to_string())
    }
}

/// Map a non-success response to a database error.
///
/// `subject` names what was requested (document id, view path) and ends up
/// in not-found and conflict errors.
pub(crate) fn status_error(status: StatusCode, body: &str, subject: &str) -> DatabaseError {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if !err.reason.is_empty() => format!("{}: {}", err.error, err.reason),
        Ok(err) if !err.error.is_empty() => err.error,
        _ => format!("HTTP {}", status.as_u16()),
    };

    match status.as_u16() {
        404 => DatabaseError::NotFound(subject.to_string()),
        409 => DatabaseError::Conflict(subject.to_string()),
        429 | 500..=599 => DatabaseError::Transient {
            status: status.as_u16(),
            message,
        },
        other => DatabaseError::Rejected {
            status: other,
            message,
        },
    }
}
