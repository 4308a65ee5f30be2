//! Storage error types
//!
//! - `BackendUnavailable` is transient: the commit that hit it is rolled back
//!   and may be retried or redelivered.
//! - `SchemaDrift` is fatal for the module: the backend no longer matches the
//!   compiled schema and an operator has to intervene.
//! - Everything else signals a write the backend refused.

use thiserror::Error;

use crate::errors::Severity;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the storage compiler and backends.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// Backend structure is incompatible with the compiled table
    #[error("schema drift on table {table:?}: {reason}")]
    SchemaDrift { table: String, reason: String },

    /// Backend could not be reached or aborted the transaction
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Write addressed a table that does not exist
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Table already exists
    #[error("table already exists: {0}")]
    TableExists(String),

    /// Cell rejected by a column type, nullability or check constraint
    #[error("constraint violation on {table:?}.{column:?}: {reason}")]
    ConstraintViolation {
        table: String,
        column: String,
        reason: String,
    },

    /// Value could not be encoded for its column
    #[error("cannot encode value for column {column:?}: {reason}")]
    Encoding { column: String, reason: String },
}

impl StorageError {
    /// Stable error code for logs and callers.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::SchemaDrift { .. } => "STORAGE_SCHEMA_DRIFT",
            StorageError::BackendUnavailable(_) => "STORAGE_BACKEND_UNAVAILABLE",
            StorageError::TableNotFound(_) => "STORAGE_TABLE_NOT_FOUND",
            StorageError::TableExists(_) => "STORAGE_TABLE_EXISTS",
            StorageError::ConstraintViolation { .. } => "STORAGE_CONSTRAINT_VIOLATION",
            StorageError::Encoding { .. } => "STORAGE_ENCODING",
        }
    }

    /// Returns true if retrying the same commit may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::BackendUnavailable(_))
    }

    /// Severity of this error.
    pub fn severity(&self) -> Severity {
        match self {
            StorageError::BackendUnavailable(_) => Severity::Retryable,
            StorageError::ConstraintViolation { .. } | StorageError::Encoding { .. } => {
                Severity::Reject
            }
            StorageError::SchemaDrift { .. }
            | StorageError::TableNotFound(_)
            | StorageError::TableExists(_) => Severity::Fatal,
        }
    }
}
