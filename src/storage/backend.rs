//! The storage seam
//!
//! Everything above this module talks to storage through `Backend`. A backend
//! applies a `WriteBatch` atomically: either every row operation and every
//! watermark update becomes visible, or none does.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{DELETED_AT_COLUMN, DELETED_COLUMN};

use super::column::{Cell, ColumnSpec};
use super::compiler::TableSpec;
use super::errors::StorageResult;

/// Which rows a read returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowView {
    /// Rows not marked deleted
    Live,
    /// Every row, tombstoned ones included
    IncludeTombstoned,
}

/// One staged change to a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowOp {
    /// Insert if absent, otherwise overwrite the given columns.
    /// Clears a tombstone on tables that retain deletions.
    Upsert {
        table: String,
        key: Vec<Cell>,
        values: Vec<(String, Cell)>,
    },
    /// Physically remove the row. No-op if absent.
    Delete { table: String, key: Vec<Cell> },
    /// Mark the row deleted, keeping its last values. No-op if absent.
    Tombstone {
        table: String,
        key: Vec<Cell>,
        deleted_at: DateTime<Utc>,
    },
}

impl RowOp {
    /// Table the operation targets.
    pub fn table(&self) -> &str {
        match self {
            RowOp::Upsert { table, .. } | RowOp::Delete { table, .. } | RowOp::Tombstone { table, .. } => {
                table
            }
        }
    }

    /// Key of the targeted row.
    pub fn key(&self) -> &[Cell] {
        match self {
            RowOp::Upsert { key, .. } | RowOp::Delete { key, .. } | RowOp::Tombstone { key, .. } => key,
        }
    }
}

/// Everything one commit writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Row operations in staging order
    pub ops: Vec<RowOp>,
    /// New watermark per module
    pub watermarks: Vec<(String, u64)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: RowOp) {
        self.ops.push(op);
    }

    pub fn set_watermark(&mut self, module: impl Into<String>, sequence: u64) {
        self.watermarks.push((module.into(), sequence));
    }

    /// True if the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.watermarks.is_empty()
    }
}

/// A stored row, column name to cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub cells: BTreeMap<String, Cell>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells.get(column)
    }

    /// True when the row carries a set `_deleted` flag.
    pub fn is_tombstoned(&self) -> bool {
        self.get(DELETED_COLUMN).and_then(Cell::as_bool).unwrap_or(false)
    }

    /// Deletion time of a tombstoned row.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self.get(DELETED_AT_COLUMN) {
            Some(Cell::Timestamp(t)) => Some(*t),
            _ => None,
        }
    }
}

/// Storage seam used by the indexer.
///
/// Implementations must serialize `apply` calls and must never expose a
/// partially applied batch.
pub trait Backend: Send + Sync {
    /// Returns the stored structure of a table, or `None` if it does not exist.
    fn describe_table(&self, table: &str) -> StorageResult<Option<TableSpec>>;

    /// Creates a table. Fails with `TableExists` if it is already present.
    fn create_table(&self, spec: &TableSpec) -> StorageResult<()>;

    /// Adds a nullable or defaulted column to an existing table.
    fn add_column(&self, table: &str, column: &ColumnSpec) -> StorageResult<()>;

    /// Applies a batch atomically.
    fn apply(&self, batch: &WriteBatch) -> StorageResult<()>;

    /// Last committed sequence of a module.
    fn watermark(&self, module: &str) -> StorageResult<Option<u64>>;

    /// Rows of a table in primary key order.
    fn select(&self, table: &str, view: RowView) -> StorageResult<Vec<Row>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_tombstone_flag() {
        let mut cells = BTreeMap::new();
        cells.insert("id".to_string(), Cell::Text("a".into()));
        let row = Row { cells: cells.clone() };
        assert!(!row.is_tombstoned());

        cells.insert(DELETED_COLUMN.to_string(), Cell::Bool(true));
        let row = Row { cells };
        assert!(row.is_tombstoned());
        assert!(row.deleted_at().is_none());
    }

    #[test]
    fn test_batch_is_empty() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());
        batch.set_watermark("test", 1);
        assert!(!batch.is_empty());
    }
}
