//! Error types for the client.
//!
//! Each layer has its own error so callers can tell a bad message from a
//! broken database from an unreachable server:
//!
//! - [`DbError`] for local persistence
//! - [`ApplyError`] for one message that could not be merged
//! - [`TrackError`] for local changes that could not be queued
//! - [`SyncError`] for a failed sync cycle

use serde::{Deserialize, Serialize};
use tally_engine::{CellKey, Error as EngineError, Timestamp};

/// Local persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Table {table} is missing column {column}")]
    MissingColumn { table: String, column: String },

    /// Stored data failed to parse, or a lookup named something the
    /// schema registry does not know.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// A single message failed to merge. Never aborts the rest of a batch.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Rejected: {0}")]
    Rejected(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl From<sqlx::Error> for ApplyError {
    fn from(e: sqlx::Error) -> Self {
        ApplyError::Storage(e.into())
    }
}

/// Local changes could not be stamped or queued. Nothing was written; the
/// caller must retry.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("Invalid mutation: {0}")]
    Rejected(EngineError),

    #[error("Clock error: {0}")]
    Clock(EngineError),

    /// The fresh stamp lost to the stored cell clock, which is ahead of
    /// anything this clock has issued or observed.
    #[error(
        "Local write to {}/{}/{} at {timestamp} is older than the stored value",
        .cell.dataset, .cell.row, .cell.column
    )]
    Shadowed { cell: CellKey, timestamp: Timestamp },

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl From<ApplyError> for TrackError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::Rejected(e) => TrackError::Rejected(e),
            ApplyError::Storage(e) => TrackError::Storage(e),
        }
    }
}

impl From<sqlx::Error> for TrackError {
    fn from(e: sqlx::Error) -> Self {
        TrackError::Storage(e.into())
    }
}

/// Why a sync cycle failed, as exposed by the scope state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    Decode,
    Auth,
    Network,
    ServerRejected,
    Incomplete,
    Database,
    Clock,
    Cancelled,
}

/// A sync cycle failed. The outbox and cursor are untouched.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Corrupt envelope or value on the wire
    #[error("Decode error: {0}")]
    Decode(EngineError),

    /// Token missing, expired or rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transient transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// The server refused the request for this scope
    #[error("Server rejected request ({status}): {body}")]
    ServerRejected { status: u16, body: String },

    /// Some pulled messages could not be applied
    #[error("{failed} of {total} pulled messages failed to apply")]
    Incomplete { failed: usize, total: usize },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Clock error: {0}")]
    Clock(EngineError),

    /// The caller's deadline elapsed
    #[error("Sync cancelled: deadline elapsed")]
    Cancelled,
}

impl SyncError {
    /// Whether retrying the same cycle may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            SyncError::Decode(_) => FailureReason::Decode,
            SyncError::Auth(_) => FailureReason::Auth,
            SyncError::Network(_) => FailureReason::Network,
            SyncError::ServerRejected { .. } => FailureReason::ServerRejected,
            SyncError::Incomplete { .. } => FailureReason::Incomplete,
            SyncError::Database(_) => FailureReason::Database,
            SyncError::Clock(_) => FailureReason::Clock,
            SyncError::Cancelled => FailureReason::Cancelled,
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Database(e.into())
    }
}
