//! Per-module commit watermarks
//!
//! Watermarks live in an ordinary table so a backend can write them in the
//! same transaction as the data rows they cover.

use super::backend::{Row, RowOp};
use super::column::{Cell, ColumnSpec, ColumnType};
use super::compiler::TableSpec;
use super::errors::{StorageError, StorageResult};

/// Table holding the last committed sequence of each module.
pub const WATERMARK_TABLE: &str = "_indexer_watermarks";

const MODULE_COLUMN: &str = "module_name";
const SEQUENCE_COLUMN: &str = "sequence";

/// Structure of the watermark table.
pub fn watermark_table_spec() -> TableSpec {
    TableSpec {
        name: WATERMARK_TABLE.to_string(),
        columns: vec![
            ColumnSpec::new(MODULE_COLUMN, ColumnType::Text, false),
            ColumnSpec::new(SEQUENCE_COLUMN, ColumnType::Numeric, false),
        ],
        primary_key: vec![MODULE_COLUMN.to_string()],
    }
}

/// Key of a module's watermark row.
pub fn watermark_key(module: &str) -> Vec<Cell> {
    vec![Cell::Text(module.to_string())]
}

/// Row operation recording `sequence` as the module's watermark.
pub fn watermark_op(module: &str, sequence: u64) -> RowOp {
    RowOp::Upsert {
        table: WATERMARK_TABLE.to_string(),
        key: watermark_key(module),
        values: vec![(SEQUENCE_COLUMN.to_string(), Cell::Numeric(sequence.to_string()))],
    }
}

/// Reads the sequence stored in a watermark row.
pub fn read_watermark(row: &Row) -> StorageResult<u64> {
    let corrupt = |reason: String| StorageError::Encoding {
        column: SEQUENCE_COLUMN.to_string(),
        reason,
    };
    match row.get(SEQUENCE_COLUMN) {
        Some(Cell::Numeric(s)) => s.parse::<u64>().map_err(|e| corrupt(e.to_string())),
        other => Err(corrupt(format!("unexpected watermark cell {:?}", other))),
    }
}
