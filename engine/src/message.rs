//! Messages: timestamped assignments of one value to one cell.
//!
//! A message is an immutable fact. Local edits start as [`Mutation`]s and
//! become messages once stamped by the clock.

use crate::{ColumnName, DatasetName, RowId, Timestamp, Value};
use serde::{Deserialize, Serialize};

/// Dataset reserved for device-local preferences. Never merged or transmitted.
pub const LOCAL_ONLY_DATASET: &str = "prefs";

/// Address of one cell: `(dataset, row, column)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellKey {
    pub dataset: DatasetName,
    pub row: RowId,
    pub column: ColumnName,
}

impl CellKey {
    pub fn new(
        dataset: impl Into<DatasetName>,
        row: impl Into<RowId>,
        column: impl Into<ColumnName>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
        }
    }
}

/// An unstamped local change produced by a use-case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub dataset: DatasetName,
    pub row: RowId,
    pub column: ColumnName,
    pub value: Value,
}

impl Mutation {
    pub fn new(
        dataset: impl Into<DatasetName>,
        row: impl Into<RowId>,
        column: impl Into<ColumnName>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether this mutation targets the local-only `prefs` dataset.
    pub fn is_local_only(&self) -> bool {
        self.dataset == LOCAL_ONLY_DATASET
    }

    /// Attach a timestamp, producing the message.
    pub fn stamp(self, timestamp: Timestamp) -> Message {
        Message {
            dataset: self.dataset,
            row: self.row,
            column: self.column,
            value: self.value,
            timestamp,
        }
    }
}

/// A timestamped cell assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub dataset: DatasetName,
    pub row: RowId,
    pub column: ColumnName,
    pub value: Value,
    pub timestamp: Timestamp,
}

impl Message {
    /// Create a new message.
    pub fn new(
        dataset: impl Into<DatasetName>,
        row: impl Into<RowId>,
        column: impl Into<ColumnName>,
        value: impl Into<Value>,
        timestamp: Timestamp,
    ) -> Self {
        Mutation::new(dataset, row, column, value).stamp(timestamp)
    }

    /// The cell this message writes.
    pub fn cell(&self) -> CellKey {
        CellKey::new(&self.dataset, &self.row, &self.column)
    }

    pub fn is_local_only(&self) -> bool {
        self.dataset == LOCAL_ONLY_DATASET
    }
}
