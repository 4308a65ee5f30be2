//! In-process transactional backend
//!
//! Tables live behind one mutex. `apply` stages every touched table on a
//! copy and swaps the copies in only after the whole batch succeeded, so a
//! failing batch leaves nothing behind.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::schema::{DELETED_AT_COLUMN, DELETED_COLUMN};

use super::backend::{Backend, Row, RowOp, RowView, WriteBatch};
use super::column::{Cell, ColumnSpec};
use super::compiler::TableSpec;
use super::errors::{StorageError, StorageResult};
use super::watermark::{read_watermark, watermark_key, watermark_op, WATERMARK_TABLE};

#[derive(Debug, Clone)]
struct Table {
    spec: TableSpec,
    /// Encoded primary key to row
    rows: BTreeMap<String, Row>,
}

impl Table {
    fn new(spec: TableSpec) -> Self {
        Self {
            spec,
            rows: BTreeMap::new(),
        }
    }

    fn encode_key(&self, key: &[Cell]) -> StorageResult<String> {
        if key.len() != self.spec.primary_key.len() {
            return Err(self.violation(
                &self.spec.primary_key.join(","),
                format!("expected {} key cells, got {}", self.spec.primary_key.len(), key.len()),
            ));
        }
        for (column, cell) in self.spec.key_columns().zip(key) {
            column.check(cell).map_err(|reason| self.violation(&column.name, reason))?;
        }
        serde_json::to_string(key).map_err(|e| StorageError::Encoding {
            column: self.spec.primary_key.join(","),
            reason: e.to_string(),
        })
    }

    fn violation(&self, column: &str, reason: String) -> StorageError {
        StorageError::ConstraintViolation {
            table: self.spec.name.clone(),
            column: column.to_string(),
            reason,
        }
    }

    fn upsert(&mut self, key: &[Cell], values: &[(String, Cell)]) -> StorageResult<()> {
        let encoded = self.encode_key(key)?;
        let mut row = match self.rows.get(&encoded) {
            Some(row) => row.clone(),
            None => {
                let mut cells: BTreeMap<String, Cell> = self
                    .spec
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.initial_cell()))
                    .collect();
                for (name, cell) in self.spec.primary_key.iter().zip(key) {
                    cells.insert(name.clone(), cell.clone());
                }
                Row { cells }
            }
        };

        for (name, cell) in values {
            if self.spec.primary_key.contains(name) {
                return Err(self.violation(name, "key columns cannot be overwritten".into()));
            }
            let column = self
                .spec
                .column(name)
                .ok_or_else(|| self.violation(name, "no such column".into()))?;
            column.check(cell).map_err(|reason| self.violation(name, reason))?;
            row.cells.insert(name.clone(), cell.clone());
        }

        if self.spec.retains_deletions() {
            row.cells.insert(DELETED_COLUMN.to_string(), Cell::Bool(false));
            row.cells.insert(DELETED_AT_COLUMN.to_string(), Cell::Null);
        }

        // Columns not set by this write still have to satisfy their constraints.
        for column in &self.spec.columns {
            let cell = row.cells.get(&column.name).unwrap_or(&Cell::Null);
            column.check(cell).map_err(|reason| self.violation(&column.name, reason))?;
        }

        self.rows.insert(encoded, row);
        Ok(())
    }

    fn delete(&mut self, key: &[Cell]) -> StorageResult<()> {
        let encoded = self.encode_key(key)?;
        self.rows.remove(&encoded);
        Ok(())
    }

    fn tombstone(&mut self, key: &[Cell], deleted_at: chrono::DateTime<chrono::Utc>) -> StorageResult<()> {
        if !self.spec.retains_deletions() {
            return Err(self.violation(DELETED_COLUMN, "table does not retain deletions".into()));
        }
        let encoded = self.encode_key(key)?;
        if let Some(row) = self.rows.get_mut(&encoded) {
            row.cells.insert(DELETED_COLUMN.to_string(), Cell::Bool(true));
            row.cells.insert(DELETED_AT_COLUMN.to_string(), Cell::Timestamp(deleted_at));
        }
        Ok(())
    }

    fn apply(&mut self, op: &RowOp) -> StorageResult<()> {
        match op {
            RowOp::Upsert { key, values, .. } => self.upsert(key, values),
            RowOp::Delete { key, .. } => self.delete(key),
            RowOp::Tombstone { key, deleted_at, .. } => self.tombstone(key, *deleted_at),
        }
    }
}

/// In-memory `Backend` with fault injection for tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<BTreeMap<String, Table>>,
    unavailable: AtomicBool,
    failures_pending: AtomicU32,
    batches_applied: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` calls to `apply` fail with `BackendUnavailable`.
    pub fn fail_next_applies(&self, n: u32) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Simulates losing (or regaining) the connection. While unavailable
    /// every operation fails with `BackendUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of batches applied successfully.
    pub fn batches_applied(&self) -> u64 {
        self.batches_applied.load(Ordering::SeqCst)
    }

    /// Every stored row of every table, tombstones included, in a stable order.
    pub fn dump(&self) -> BTreeMap<String, Vec<Row>> {
        self.tables
            .lock()
            .iter()
            .map(|(name, table)| (name.clone(), table.rows.values().cloned().collect()))
            .collect()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::BackendUnavailable("connection lost".into()));
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Backend for MemoryBackend {
    fn describe_table(&self, table: &str) -> StorageResult<Option<TableSpec>> {
        self.check_available()?;
        Ok(self.tables.lock().get(table).map(|t| t.spec.clone()))
    }

    fn create_table(&self, spec: &TableSpec) -> StorageResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        if tables.contains_key(&spec.name) {
            return Err(StorageError::TableExists(spec.name.clone()));
        }
        tables.insert(spec.name.clone(), Table::new(spec.clone()));
        Ok(())
    }

    fn add_column(&self, table: &str, column: &ColumnSpec) -> StorageResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        if stored.spec.column(&column.name).is_some() {
            return Err(StorageError::SchemaDrift {
                table: table.to_string(),
                reason: format!("column {:?} already exists", column.name),
            });
        }
        if !column.is_additive() {
            return Err(stored.violation(&column.name, "added columns must be nullable or defaulted".into()));
        }
        for row in stored.rows.values_mut() {
            row.cells.insert(column.name.clone(), column.initial_cell());
        }
        stored.spec.columns.push(column.clone());
        Ok(())
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        self.check_available()?;
        if self.take_injected_failure() {
            return Err(StorageError::BackendUnavailable("injected failure".into()));
        }

        let mut tables = self.tables.lock();
        let mut staged: BTreeMap<String, Table> = BTreeMap::new();

        let watermark_ops = batch.watermarks.iter().map(|(module, seq)| watermark_op(module, *seq));
        for op in batch.ops.iter().cloned().chain(watermark_ops) {
            let name = op.table();
            if !staged.contains_key(name) {
                let table = tables
                    .get(name)
                    .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
                staged.insert(name.to_string(), table.clone());
            }
            if let Some(table) = staged.get_mut(name) {
                table.apply(&op)?;
            }
        }

        tables.extend(staged);
        self.batches_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn watermark(&self, module: &str) -> StorageResult<Option<u64>> {
        self.check_available()?;
        let tables = self.tables.lock();
        let table = match tables.get(WATERMARK_TABLE) {
            Some(table) => table,
            None => return Ok(None),
        };
        let encoded = table.encode_key(&watermark_key(module))?;
        table.rows.get(&encoded).map(read_watermark).transpose()
    }

    fn select(&self, table: &str, view: RowView) -> StorageResult<Vec<Row>> {
        self.check_available()?;
        let tables = self.tables.lock();
        let stored = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        Ok(stored
            .rows
            .values()
            .filter(|row| view == RowView::IncludeTombstoned || !row.is_tombstoned())
            .cloned()
            .collect())
    }
}
