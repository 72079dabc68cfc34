//! Error types for the Tally engine.

use crate::{ColumnName, DatasetName};
use thiserror::Error;

/// All possible errors from the Tally engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Codec errors
    #[error("malformed value: {0}")]
    MalformedValue(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // Clock errors
    #[error("clock drift: logical time {logical} is more than {max_drift}ms ahead of wall time {wall}")]
    ClockDrift {
        logical: u64,
        wall: u64,
        max_drift: u64,
    },

    #[error("clock counter overflow at {millis}")]
    ClockOverflow { millis: u64 },

    // Schema errors
    #[error("unknown dataset: {0}")]
    UnknownDataset(DatasetName),

    #[error("unknown column '{column}' in dataset '{dataset}'")]
    UnknownColumn {
        dataset: DatasetName,
        column: ColumnName,
    },

    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: ColumnName,
        expected: String,
        got: String,
    },

    // Storage errors surfaced through `CellStore`
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
