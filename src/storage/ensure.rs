//! Reconciling compiled tables with the backend

use tracing::{debug, info, warn};

use crate::observability::Event;

use super::backend::Backend;
use super::compiler::TableSpec;
use super::errors::{StorageError, StorageResult};

/// What `ensure_schema` did to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Table did not exist and was created
    Created,
    /// Table already matched
    Unchanged,
    /// Table existed and the listed columns were added
    Extended(Vec<String>),
}

/// Makes the backend structure match `spec`. Idempotent.
///
/// A stored table is compatible when it has the same primary key, every
/// compiled column it has is identical, and every stored column the compiled table
/// lacks is nullable or defaulted. Compiled columns missing from the stored
/// table are added when they are nullable or defaulted value columns.
///
/// # Errors
///
/// `SchemaDrift` for any other divergence. Nothing is changed in that case.
pub fn ensure_schema(backend: &dyn Backend, spec: &TableSpec) -> StorageResult<EnsureOutcome> {
    let existing = match backend.describe_table(&spec.name)? {
        Some(existing) => existing,
        None => match backend.create_table(spec) {
            Ok(()) => {
                info!(
                    target: "indexer::storage",
                    event = Event::TableCreated.as_str(),
                    table = %spec.name,
                    fingerprint = spec.fingerprint(),
                );
                debug!(target: "indexer::storage", table = %spec.name, ddl = %spec.create_table_sql());
                return Ok(EnsureOutcome::Created);
            }
            // Another writer created it in between; reconcile against theirs.
            Err(StorageError::TableExists(_)) => backend
                .describe_table(&spec.name)?
                .ok_or_else(|| StorageError::TableNotFound(spec.name.clone()))?,
            Err(e) => return Err(e),
        },
    };

    let missing = diff(&existing, spec).map_err(|reason| {
        warn!(
            target: "indexer::storage",
            event = Event::SchemaDrift.as_str(),
            table = %spec.name,
            %reason,
        );
        StorageError::SchemaDrift {
            table: spec.name.clone(),
            reason,
        }
    })?;

    if missing.is_empty() {
        return Ok(EnsureOutcome::Unchanged);
    }

    let mut added = Vec::with_capacity(missing.len());
    for name in missing {
        // diff only returns compiled column names
        if let Some(column) = spec.column(&name) {
            backend.add_column(&spec.name, column)?;
            debug!(target: "indexer::storage", table = %spec.name, ddl = %spec.add_column_sql(column));
        }
        added.push(name);
    }
    info!(
        target: "indexer::storage",
        event = Event::TableExtended.as_str(),
        table = %spec.name,
        columns = ?added,
    );
    Ok(EnsureOutcome::Extended(added))
}

/// Returns the columns to add, or why the tables are incompatible.
fn diff(existing: &TableSpec, spec: &TableSpec) -> Result<Vec<String>, String> {
    if existing.primary_key != spec.primary_key {
        return Err(format!(
            "primary key is ({}), compiled ({})",
            existing.primary_key.join(", "),
            spec.primary_key.join(", ")
        ));
    }

    let mut missing = Vec::new();
    for column in &spec.columns {
        match existing.column(&column.name) {
            Some(stored) if stored == column => {}
            Some(stored) => {
                return Err(format!(
                    "column {:?} is stored as `{}`, compiled as `{}`",
                    column.name,
                    stored.sql(),
                    column.sql()
                ))
            }
            None if column.is_additive() && !spec.primary_key.contains(&column.name) => {
                missing.push(column.name.clone())
            }
            None => return Err(format!("required column {:?} is missing", column.name)),
        }
    }

    for stored in &existing.columns {
        if spec.column(&stored.name).is_none() && !stored.is_additive() {
            return Err(format!(
                "stored column {:?} is required but no longer declared",
                stored.name
            ));
        }
    }

    Ok(missing)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::storage::backend::{Row, RowView, WriteBatch};
    use crate::storage::column::{ColumnSpec, ColumnType};
    use crate::storage::memory::MemoryBackend;

    /// Reports the table missing once, as if another writer created it
    /// right after the first lookup.
    struct CreatedConcurrently {
        inner: MemoryBackend,
        hide_once: AtomicBool,
    }

    impl Backend for CreatedConcurrently {
        fn describe_table(&self, table: &str) -> StorageResult<Option<TableSpec>> {
            if self.hide_once.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.describe_table(table)
        }

        fn create_table(&self, spec: &TableSpec) -> StorageResult<()> {
            self.inner.create_table(spec)
        }

        fn add_column(&self, table: &str, column: &ColumnSpec) -> StorageResult<()> {
            self.inner.add_column(table, column)
        }

        fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
            self.inner.apply(batch)
        }

        fn watermark(&self, module: &str) -> StorageResult<Option<u64>> {
            self.inner.watermark(module)
        }

        fn select(&self, table: &str, view: RowView) -> StorageResult<Vec<Row>> {
            self.inner.select(table, view)
        }
    }

    fn spec(columns: Vec<ColumnSpec>) -> TableSpec {
        TableSpec {
            name: "test_counters".into(),
            columns,
            primary_key: vec!["id".into()],
        }
    }

    fn id() -> ColumnSpec {
        ColumnSpec::new("id", ColumnType::Text, false)
    }

    #[test]
    fn test_lost_create_race_reconciles() {
        let compiled = spec(vec![id(), ColumnSpec::new("count", ColumnType::BigInt, true)]);
        let backend = CreatedConcurrently {
            inner: MemoryBackend::new(),
            hide_once: AtomicBool::new(true),
        };
        backend.inner.create_table(&spec(vec![id()])).unwrap();

        assert_eq!(
            ensure_schema(&backend, &compiled).unwrap(),
            EnsureOutcome::Extended(vec!["count".to_string()])
        );
        assert_eq!(ensure_schema(&backend, &compiled).unwrap(), EnsureOutcome::Unchanged);
    }

    #[test]
    fn test_diff_identical() {
        let a = spec(vec![id(), ColumnSpec::new("count", ColumnType::BigInt, true)]);
        assert_eq!(diff(&a, &a.clone()).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_diff_additive() {
        let stored = spec(vec![id()]);
        let compiled = spec(vec![id(), ColumnSpec::new("count", ColumnType::BigInt, true)]);
        assert_eq!(diff(&stored, &compiled).unwrap(), vec!["count".to_string()]);
    }

    #[test]
    fn test_diff_type_change_is_drift() {
        let stored = spec(vec![id(), ColumnSpec::new("count", ColumnType::Integer, true)]);
        let compiled = spec(vec![id(), ColumnSpec::new("count", ColumnType::BigInt, true)]);
        assert!(diff(&stored, &compiled).unwrap_err().contains("count"));
    }

    #[test]
    fn test_diff_required_column_is_drift() {
        let stored = spec(vec![id()]);
        let compiled = spec(vec![id(), ColumnSpec::new("count", ColumnType::BigInt, false)]);
        assert!(diff(&stored, &compiled).is_err());
    }

    #[test]
    fn test_diff_stored_superset() {
        let stored = spec(vec![id(), ColumnSpec::new("memo", ColumnType::Text, true)]);
        let compiled = spec(vec![id()]);
        assert!(diff(&stored, &compiled).unwrap().is_empty());

        let stored = spec(vec![id(), ColumnSpec::new("memo", ColumnType::Text, false)]);
        assert!(diff(&stored, &compiled).is_err());
    }
}
