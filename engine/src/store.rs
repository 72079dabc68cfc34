//! In-memory cell storage.
//!
//! `MemoryStore` is the reference [`CellStore`]: tables of rows keyed by id,
//! plus a clock per written cell. It backs the engine's own tests and
//! benchmarks, and is handy for tools that replay history without a database.

use crate::{
    error::Result, CellKey, CellStore, ColumnName, DatasetName, RowId, Timestamp, Value,
    ID_COLUMN,
};
use std::collections::{BTreeMap, HashMap};

/// A row: column name to value, including the `id` column.
pub type Row = BTreeMap<ColumnName, Value>;

/// Rows of one dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    rows: BTreeMap<RowId, Row>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// All rows, including tombstoned ones.
    pub fn all_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// Rows whose `tombstone` column is not set.
    pub fn active_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values().filter(|row| !is_tombstoned(row))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Whether a row carries `tombstone = 1`.
pub fn is_tombstoned(row: &Row) -> bool {
    matches!(row.get("tombstone"), Some(Value::Number(n)) if *n == 1.0)
}

/// Tables and cell clocks held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    tables: HashMap<DatasetName, Table>,
    clocks: HashMap<CellKey, Timestamp>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a row by dataset and id.
    pub fn get(&self, dataset: &str, id: &str) -> Option<&Row> {
        self.tables.get(dataset).and_then(|t| t.get(id))
    }

    pub fn table(&self, dataset: &str) -> Option<&Table> {
        self.tables.get(dataset)
    }

    /// Current value of one cell.
    pub fn value(&self, cell: &CellKey) -> Option<&Value> {
        self.get(&cell.dataset, &cell.row)
            .and_then(|row| row.get(&cell.column))
    }

    /// Clock of one cell.
    pub fn clock(&self, cell: &CellKey) -> Option<&Timestamp> {
        self.clocks.get(cell)
    }

    /// Greatest clock across all cells.
    pub fn max_clock(&self) -> Option<&Timestamp> {
        self.clocks.values().max()
    }

    /// Number of rows in a dataset, including tombstoned ones.
    pub fn row_count(&self, dataset: &str) -> usize {
        self.tables.get(dataset).map_or(0, Table::len)
    }

    /// Number of rows in a dataset that are not tombstoned.
    pub fn active_count(&self, dataset: &str) -> usize {
        self.tables
            .get(dataset)
            .map_or(0, |t| t.active_rows().count())
    }

    fn row_mut(&mut self, cell: &CellKey) -> Result<&mut Row> {
        self.tables
            .get_mut(&cell.dataset)
            .and_then(|t| t.rows.get_mut(&cell.row))
            .ok_or_else(|| {
                crate::Error::Storage(format!("no row {}/{}", cell.dataset, cell.row))
            })
    }
}

impl CellStore for MemoryStore {
    fn cell_clock(&self, cell: &CellKey) -> Result<Option<Timestamp>> {
        Ok(self.clocks.get(cell).cloned())
    }

    fn row_exists(&self, dataset: &str, row: &str) -> Result<bool> {
        Ok(self.tables.get(dataset).is_some_and(|t| t.contains(row)))
    }

    fn insert_row(&mut self, cell: &CellKey, value: &Value, timestamp: &Timestamp) -> Result<()> {
        let table = self.tables.entry(cell.dataset.clone()).or_default();
        if table.contains(&cell.row) {
            return Err(crate::Error::Storage(format!(
                "row {}/{} already exists",
                cell.dataset, cell.row
            )));
        }

        let mut row = Row::new();
        row.insert(ID_COLUMN.to_string(), Value::Text(cell.row.clone()));
        row.insert(cell.column.clone(), value.clone());
        table.rows.insert(cell.row.clone(), row);
        self.clocks.insert(cell.clone(), timestamp.clone());
        Ok(())
    }

    fn update_cell(
        &mut self,
        cell: &CellKey,
        value: &Value,
        timestamp: &Timestamp,
    ) -> Result<()> {
        self.row_mut(cell)?
            .insert(cell.column.clone(), value.clone());
        self.clocks.insert(cell.clone(), timestamp.clone());
        Ok(())
    }
}
