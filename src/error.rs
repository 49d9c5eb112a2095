//! Domain errors surfaced through `eyre::Report`.
//!
//! Library functions return `eyre::Result`; callers that need to branch on a
//! failure use `report.downcast_ref::<StoreError>()`.

use crate::types::{Status, ValidationError};
use rusqlite::ErrorCode;
use std::path::PathBuf;

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// No `.trellis` directory at the given root.
    NotInitialized(PathBuf),
    /// Task not found.
    NotFound(String),
    /// Invalid status transition.
    InvalidTransition { from: Status, to: Status },
    /// `close` was called without a reason.
    MissingCloseReason,
    /// The writer lock was not acquired within the busy timeout.
    LockTimeout,
    /// The index file is not a readable database.
    IndexCorrupt(String),
    /// Validation error.
    Validation(ValidationError),
}

impl StoreError {
    /// Whether the same call may succeed if simply retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotInitialized(root) => {
                write!(f, "no .trellis directory in {}; run 'trl init' first", root.display())
            }
            StoreError::NotFound(id) => write!(f, "task not found: {}", id),
            StoreError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition from {} to {}", from, to)
            }
            StoreError::MissingCloseReason => write!(f, "a close reason is required"),
            StoreError::LockTimeout => write!(f, "timed out waiting for the index write lock"),
            StoreError::IndexCorrupt(detail) => write!(f, "index is corrupt: {}", detail),
            StoreError::Validation(e) => write!(f, "validation error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::Validation(e)
    }
}

/// Look for a `StoreError` in a report.
pub fn store_error(report: &eyre::Report) -> Option<&StoreError> {
    report.downcast_ref::<StoreError>()
}

/// Convert a SQLite failure, turning lock contention into `LockTimeout`.
pub(crate) fn sqlite(e: rusqlite::Error) -> eyre::Report {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => eyre::eyre!(StoreError::LockTimeout),
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) => {
            eyre::eyre!(StoreError::IndexCorrupt(e.to_string()))
        }
        _ => eyre::Report::new(e),
    }
}
