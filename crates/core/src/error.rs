//! Error types for the keepsake storage layer
//!
//! Every fallible storage operation returns [`KeepsakeResult`]. A record that
//! does not exist is never an error: lookups return `Ok(None)`.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for keepsake operations
pub type KeepsakeResult<T> = std::result::Result<T, Error>;

/// Error types for the storage layer
#[derive(Debug, Error)]
pub enum Error {
    /// The backend could not load a record
    #[error("Load failed: {0}")]
    Load(String),

    /// The backend could not persist a record
    #[error("Save failed: {0}")]
    Save(String),

    /// The backend could not remove a record
    #[error("Delete failed: {0}")]
    Delete(String),

    /// The backend rejected or failed a query
    #[error("Query failed: {0}")]
    Query(String),

    /// Translation between domain and stored form failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error surfaced by a backend
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A query that is not restricted to explicit keys was issued against a
    /// backend that only supports primary-key lookups
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    /// A per-key lock could not be acquired within the configured timeout
    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    /// The dispatcher could not accept the task
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// A dispatched task panicked before completing
    #[error("Storage task panicked: {0}")]
    TaskPanicked(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The service has no repository attached
    #[error("Storage detached: {0}")]
    Detached(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Build a [`Error::Load`] from a context message and its cause.
    pub fn load(context: impl std::fmt::Display, cause: impl std::fmt::Display) -> Self {
        Error::Load(format!("{}: {}", context, cause))
    }

    /// Build a [`Error::Save`] from a context message and its cause.
    pub fn save(context: impl std::fmt::Display, cause: impl std::fmt::Display) -> Self {
        Error::Save(format!("{}: {}", context, cause))
    }

    /// Build a [`Error::Delete`] from a context message and its cause.
    pub fn delete(context: impl std::fmt::Display, cause: impl std::fmt::Display) -> Self {
        Error::Delete(format!("{}: {}", context, cause))
    }

    /// Build a [`Error::UnsupportedQuery`].
    pub fn unsupported_query(reason: impl Into<String>) -> Self {
        Error::UnsupportedQuery(reason.into())
    }

    /// True for [`Error::UnsupportedQuery`].
    pub fn is_unsupported_query(&self) -> bool {
        matches!(self, Error::UnsupportedQuery(_))
    }

    /// True for errors raised by a repository or translator.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Error::Load(_)
                | Error::Save(_)
                | Error::Delete(_)
                | Error::Query(_)
                | Error::Serialization(_)
                | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_load() {
        let err = Error::load("user 42", "file truncated");
        let msg = err.to_string();
        assert!(msg.contains("Load failed"));
        assert!(msg.contains("user 42"));
        assert!(msg.contains("file truncated"));
    }

    #[test]
    fn test_error_display_unsupported_query() {
        let err = Error::unsupported_query("name filter");
        assert!(err.to_string().contains("Unsupported query"));
        assert!(err.is_unsupported_query());
        assert!(!err.is_backend_failure());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_backend_failure());
    }

    #[test]
    fn test_error_from_serde_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = result.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_lock_timeout_is_not_backend_failure() {
        let err = Error::LockTimeout("world:nether".to_string());
        assert!(!err.is_backend_failure());
        assert!(err.to_string().contains("world:nether"));
    }
}
