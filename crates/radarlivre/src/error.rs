//! Error types for radarlivre.
//!
//! This module defines all error types used throughout the radarlivre crate.
//! Out-of-order observations are not errors; they are reported as
//! [`ProjectionOutcome::Stale`](crate::projector::ProjectionOutcome::Stale).

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for radarlivre operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Input Errors ===
    /// A submitted observation or reference record failed validation.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },

    /// No state exists for the requested airplane.
    #[error("no state recorded for airplane {airplane_id}")]
    NotFound {
        /// The ICAO identifier that was looked up.
        airplane_id: String,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// The durable store could not serve the request.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store call exceeded the deadline of its call context.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// A store call was abandoned because its call context was cancelled.
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// Description of the operation that was cancelled.
        operation: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for radarlivre operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new validation error for the named field.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a not-found error for an airplane.
    #[must_use]
    pub fn not_found(airplane_id: impl Into<String>) -> Self {
        Self::NotFound {
            airplane_id: airplane_id.into(),
        }
    }

    /// Create a new store-unavailable error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is an input validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error is a lookup miss.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error originates from the durable store.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::StoreUnavailable(_)
                | Self::Timeout { .. }
                | Self::Cancelled { .. }
        )
    }

    /// Check if retrying the same store call may succeed.
    ///
    /// Only busy or locked `SQLite` databases count as transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DatabaseQuery(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_error() -> Error {
        Error::DatabaseQuery(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn test_validation_display() {
        let err = Error::validation("latitude", "not a finite decimal");
        assert_eq!(err.to_string(), "invalid latitude: not a finite decimal");
        assert!(err.is_validation());
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("ABC123");
        assert_eq!(err.to_string(), "no state recorded for airplane ABC123");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_store_unavailable_classification() {
        assert!(Error::store_unavailable("down").is_store_unavailable());
        assert!(Error::Timeout {
            operation: "get_state".to_string()
        }
        .is_store_unavailable());
        assert!(Error::Cancelled {
            operation: "insert_observation".to_string()
        }
        .is_store_unavailable());
        assert!(busy_error().is_store_unavailable());
        assert!(!Error::internal("bug").is_store_unavailable());
    }

    #[test]
    fn test_busy_is_transient() {
        assert!(busy_error().is_transient());
        assert!(!Error::store_unavailable("down").is_transient());
        assert!(!Error::DatabaseQuery(rusqlite::Error::QueryReturnedNoRows).is_transient());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
