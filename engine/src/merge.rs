//! Last-writer-wins merge of messages into cell storage.
//!
//! This is the core of convergence. Every cell keeps the timestamp of the
//! message whose value it currently holds. An incoming message wins only if
//! its timestamp is strictly greater, so:
//!
//! - re-applying a message is a no-op (idempotence)
//! - any delivery order ends at the value of the greatest timestamp
//!   (commutativity)
//! - rows are created lazily by whichever message reaches them first
//!
//! # Algorithm
//!
//! 1. Messages for the local-only `prefs` dataset are discarded untouched
//! 2. The target `(dataset, column)` is checked against the schema registry
//! 3. No clock for the cell: insert the row (or update it if it exists)
//! 4. Clock present: write only if the message timestamp is strictly greater
//!
//! Each message is an independent unit of work. A failing message never
//! prevents the others in a batch from being applied.

use crate::{
    error::Result, CellKey, DatasetSchema, Error, FieldDef, Message, SchemaRegistry, Timestamp,
    Value,
};
use serde::{Deserialize, Serialize};

/// Why a message was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscardReason {
    /// Targets the device-local `prefs` dataset
    LocalOnly,
    /// The cell already holds a value with an equal or newer timestamp
    Stale,
}

/// Result of applying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeOutcome {
    /// The message won and its value is now stored.
    Applied {
        /// Whether the row did not exist before this message
        row_created: bool,
    },
    /// The message lost or does not belong in synced storage.
    Discarded { reason: DiscardReason },
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Applied { .. })
    }

    pub fn stale() -> Self {
        MergeOutcome::Discarded {
            reason: DiscardReason::Stale,
        }
    }

    pub fn local_only() -> Self {
        MergeOutcome::Discarded {
            reason: DiscardReason::LocalOnly,
        }
    }
}

/// What to do with a message, decided before any storage is touched.
///
/// Every store goes through [`MergeEngine::plan`], so validation and
/// arbitration are decided in one place. A store only carries out the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePlan<'a> {
    /// Store the value and advance the cell clock.
    Write(CellWrite<'a>),
    Discard(DiscardReason),
}

/// A write that won arbitration, resolved against the schema registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellWrite<'a> {
    pub dataset: &'a DatasetSchema,
    pub field: &'a FieldDef,
    /// The cell has no clock yet, so its row may still have to be created
    pub first_write: bool,
}

/// Storage the merge engine writes through.
///
/// Implementations must persist a cell value and its clock together: either
/// both are visible after a call returns `Ok`, or neither is.
pub trait CellStore {
    /// Timestamp of the value currently stored in the cell, if ever written.
    fn cell_clock(&self, cell: &CellKey) -> Result<Option<Timestamp>>;

    /// Whether a row with this id exists in the dataset's table.
    fn row_exists(&self, dataset: &str, row: &str) -> Result<bool>;

    /// Create a row holding only its id and this one cell.
    fn insert_row(&mut self, cell: &CellKey, value: &Value, timestamp: &Timestamp) -> Result<()>;

    /// Overwrite one cell of an existing row.
    fn update_cell(&mut self, cell: &CellKey, value: &Value, timestamp: &Timestamp)
        -> Result<()>;
}

/// Summary of applying a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub applied: usize,
    pub discarded: usize,
    /// Failed messages by position in the batch
    pub failed: Vec<(usize, Error)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies messages under last-writer-wins arbitration.
pub struct MergeEngine<'a> {
    schema: &'a SchemaRegistry,
}

impl<'a> MergeEngine<'a> {
    pub fn new(schema: &'a SchemaRegistry) -> Self {
        Self { schema }
    }

    /// Validate a message and arbitrate it against the stored cell clock.
    pub fn plan(&self, message: &Message, stored: Option<&Timestamp>) -> Result<MergePlan<'a>> {
        if message.is_local_only() {
            return Ok(MergePlan::Discard(DiscardReason::LocalOnly));
        }
        let (dataset, field) =
            self.schema
                .resolve(&message.dataset, &message.column, &message.value)?;

        Ok(match stored {
            Some(current) if message.timestamp <= *current => {
                MergePlan::Discard(DiscardReason::Stale)
            }
            _ => MergePlan::Write(CellWrite {
                dataset,
                field,
                first_write: stored.is_none(),
            }),
        })
    }

    /// Apply one message to a store.
    pub fn apply<S: CellStore + ?Sized>(
        &self,
        store: &mut S,
        message: &Message,
    ) -> Result<MergeOutcome> {
        let cell = message.cell();
        let stored = store.cell_clock(&cell)?;
        match self.plan(message, stored.as_ref())? {
            MergePlan::Discard(reason) => Ok(MergeOutcome::Discarded { reason }),
            MergePlan::Write(write) => {
                let row_created =
                    write.first_write && !store.row_exists(&write.dataset.name, &cell.row)?;
                if row_created {
                    store.insert_row(&cell, &message.value, &message.timestamp)?;
                } else {
                    store.update_cell(&cell, &message.value, &message.timestamp)?;
                }
                Ok(MergeOutcome::Applied { row_created })
            }
        }
    }

    /// Apply messages in order, each independently.
    pub fn apply_batch<S: CellStore + ?Sized>(
        &self,
        store: &mut S,
        messages: &[Message],
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, message) in messages.iter().enumerate() {
            match self.apply(store, message) {
                Ok(MergeOutcome::Applied { .. }) => report.applied += 1,
                Ok(MergeOutcome::Discarded { .. }) => report.discarded += 1,
                Err(e) => report.failed.push((index, e)),
            }
        }
        report
    }
}
