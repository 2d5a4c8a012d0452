//! Error types for lobi-archiver
//!
//! This module defines the error hierarchy that covers:
//! - SQLite job queue errors
//! - Volume storage errors
//! - HTTP fetch errors
//! - Transient body decode failures
//! - Configuration and CLI errors
//!
//! Transient conditions (timeouts, upstream restarts, lock contention) are
//! retried where they occur and never reach these types. What does reach
//! them is either fatal to the run or reported to the operator.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the archiver
#[derive(Error, Debug)]
pub enum ArchiverError {
    /// Job queue errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Archive storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// HTTP transport errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (seed file, archive inspection)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking or spawned task died
    #[error("Task failed: {0}")]
    Task(String),
}

/// Job queue (SQLite) errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to open or create the database file
    #[error("Failed to open database at '{path}': {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// Schema error
    #[error("Database schema error: {0}")]
    Schema(String),

    /// A row held a value outside the known domain
    #[error("Corrupt row in '{table}': {reason}")]
    CorruptRow { table: &'static str, reason: String },

    /// The queue mutex was poisoned by a panicking holder
    #[error("Job queue lock poisoned")]
    Poisoned,
}

impl DbError {
    /// Check if this error is transient write contention between connections
    pub fn is_contention(&self) -> bool {
        match self {
            DbError::Sqlite(e) => is_contention(e),
            _ => false,
        }
    }
}

/// Returns true for SQLITE_BUSY / SQLITE_LOCKED failures
pub fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Archive storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Volume root could not be prepared
    #[error("Failed to prepare volume '{root}': {source}")]
    VolumeSetup {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A packed batch could not be persisted
    ///
    /// Every job of the batch has been requeued before this is returned.
    /// Remediation is manual: remove any partial `batch_ref` file, reset
    /// stuck FETCHING rows (`lobi-archiver recover`), restart.
    #[error("Failed to save {batch_ref} ({} jobs, {bytes} bytes): no volume had room or the write failed", job_ids.len())]
    SaveFailed {
        batch_ref: String,
        bytes: usize,
        job_ids: Vec<i64>,
        status_codes: Vec<u16>,
    },

    /// Packed archive could not be decoded
    #[error("Malformed packed archive: {0}")]
    Malformed(String),

    /// Packed archive carries a version tag we do not understand
    #[error("Unsupported packed archive version {0}")]
    UnsupportedVersion(i32),
}

/// HTTP transport errors
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request did not complete within the configured timeout
    #[error("Request to '{path}' timed out")]
    Timeout { path: String },

    /// Connection, TLS, or body read failure
    #[error("Request to '{path}' failed: {reason}")]
    Transport { path: String, reason: String },

    /// Failed to construct the HTTP client
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// Path could not be joined onto the base URL
    #[error("Invalid request path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl FetchError {
    /// Check if this error is a transport-level timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    /// Classify a reqwest error for the given request path
    pub fn from_reqwest(path: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                path: path.to_string(),
            }
        } else {
            FetchError::Transport {
                path: path.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// A fetched body could not be interpreted
///
/// Raised by a discovery policy when a 200 response does not decode, which
/// happens while the upstream is mid-deployment. The job is requeued rather
/// than completed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transient parse failure for '{path}': {reason}")]
pub struct TransientParse {
    pub path: String,
    pub reason: String,
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid volume specification
    #[error("Invalid volume '{spec}': {reason}")]
    InvalidVolume { spec: String, reason: String },

    /// No volumes configured for a run
    #[error("At least one --volume is required")]
    NoVolumes,

    /// Invalid base URL
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// Seed file missing or unreadable
    #[error("Cannot read seed file '{path}': {reason}")]
    InvalidSeedFile { path: PathBuf, reason: String },

    /// Database path error
    #[error("Invalid database path '{path}': {reason}")]
    InvalidDbPath { path: PathBuf, reason: String },

    /// Measurement window must be positive
    #[error("Measurement window must be at least 1 batch")]
    InvalidMeasureWindow,
}

/// Result type alias for ArchiverError
pub type Result<T> = std::result::Result<T, ArchiverError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type alias for StorageError
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for FetchError
pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_detection() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(is_contention(&busy));
        assert!(DbError::Sqlite(busy).is_contention());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(!is_contention(&constraint));
        assert!(!DbError::Poisoned.is_contention());
    }

    #[test]
    fn test_fetch_error_timeout() {
        let timeout = FetchError::Timeout { path: "api/x".into() };
        assert!(timeout.is_timeout());

        let transport = FetchError::Transport {
            path: "api/x".into(),
            reason: "connection reset".into(),
        };
        assert!(!transport.is_timeout());
    }

    #[test]
    fn test_error_conversion() {
        let err: ArchiverError = StorageError::UnsupportedVersion(7).into();
        assert!(matches!(err, ArchiverError::Storage(_)));

        let err: ArchiverError = ConfigError::NoVolumes.into();
        assert!(matches!(err, ArchiverError::Config(_)));
    }

    #[test]
    fn test_save_failed_message() {
        let err = StorageError::SaveFailed {
            batch_ref: "packed_42".into(),
            bytes: 1024,
            job_ids: vec![42, 43],
            status_codes: vec![200, 404],
        };
        let msg = err.to_string();
        assert!(msg.contains("packed_42"));
        assert!(msg.contains("2 jobs"));
    }
}
