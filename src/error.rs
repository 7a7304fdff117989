//! Error types for the contact sync layer.

use crate::types::{ContactId, Period};
use thiserror::Error;

/// Failure reported by a remote store backend.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote store unreachable")]
    Unreachable,

    #[error("Remote write rejected: {0}")]
    Rejected(String),

    #[error("Remote document malformed: {0}")]
    Malformed(String),
}

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Contact {id} not found in period {period}")]
    ContactNotFound { period: Period, id: ContactId },

    #[error("Invalid period: {year}-{month}")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Source and destination are the same period ({0}); use update instead")]
    SamePartition(Period),

    #[error("Migration from {from} to {to} failed: {reason}")]
    MigrationFailed {
        from: Period,
        to: Period,
        reason: String,
    },

    /// The contact may now exist in both partitions. `orphan` is the id of
    /// the copy left in `to`, when it is known.
    #[error("Migration from {from} to {to} failed and rollback is incomplete: {reason}")]
    RollbackIncomplete {
        from: Period,
        to: Period,
        orphan: Option<ContactId>,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Local storage is locked by another process")]
    Locked,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// True when the target record was absent (never retried).
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::ContactNotFound { .. })
    }

    /// True when the remote store could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::Unreachable))
    }

    /// True when a record may now exist in two partitions.
    pub fn needs_manual_reconciliation(&self) -> bool {
        matches!(self, SyncError::RollbackIncomplete { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            SyncError::Deserialization(e.to_string())
        } else {
            SyncError::Serialization(e.to_string())
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
