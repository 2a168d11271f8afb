//! Error types for session store operations.

use crate::database::DatabaseError;

/// Error type for session store operations.
///
/// Not-found outcomes never reach this type from the public operations: a
/// missing session is reported as `Ok(None)` by `get` and absorbed by
/// `destroy` and `touch`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A concurrent writer changed the session between probe and write.
    #[error("Session conflict: {0}")]
    Conflict(String),

    /// Failure reported by the backing database.
    #[error("Database error: {0}")]
    Database(DatabaseError),

    /// A stored document could not be read as a session record.
    #[error("Malformed session document '{id}': {reason}")]
    Codec { id: String, reason: String },

    /// Invalid store configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(id) => Error::Conflict(id),
            other => Error::Database(other),
        }
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The record was absent when the database expected it.
    NotFound,
    /// Lost an optimistic-concurrency race.
    Conflict,
    /// Network, rate-limit or server-side failure.
    Transient,
    /// The database refused the request or returned something unreadable.
    Permanent,
    /// Bad construction parameters.
    Config,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Database(DatabaseError::NotFound(_)) => ErrorKind::NotFound,
            Error::Database(e) if e.is_transient() => ErrorKind::Transient,
            Error::Database(_) | Error::Codec { .. } => ErrorKind::Permanent,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Check if this is a lost compare-and-swap race.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Check if re-issuing the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Transient)
    }
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
