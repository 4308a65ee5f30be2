//! Storage compiler and backends
//!
//! Compiles registered object types into relational table specs, reconciles
//! them with a backend, and defines the `Backend` seam the indexer writes
//! through.
//!
//! # Guarantees
//!
//! - Compilation is deterministic: equal inputs give equal specs, DDL and
//!   fingerprints
//! - A backend applies a `WriteBatch` atomically, watermark included
//! - Structural divergence is reported as `SchemaDrift`, never coerced

mod backend;
mod column;
mod compiler;
mod ensure;
mod errors;
mod memory;
mod watermark;

pub use backend::{Backend, Row, RowOp, RowView, WriteBatch};
pub use column::{canonical_numeric, quote_ident, Cell, ColumnConstraint, ColumnSpec, ColumnType};
pub use compiler::{column_type, compile, compile_field, encode_value, table_name, tombstone_columns, TableSpec};
pub use ensure::{ensure_schema, EnsureOutcome};
pub use errors::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use watermark::{watermark_table_spec, WATERMARK_TABLE};
