//! Indexer error taxonomy
//!
//! Every error the indexer surfaces is one of three severities:
//!
//! - `Reject`: one update or commit is refused, the indexer stays usable
//! - `Retryable`: the commit was rolled back and may be redelivered
//! - `Fatal`: the indexer halts and an operator has to intervene
//!
//! Nothing is ever reported as success when it was not written.

use thiserror::Error;

use crate::config::ConfigError;
use crate::schema::SchemaError;
use crate::storage::StorageError;

/// Result type for indexer operations
pub type IndexerResult<T> = Result<T, IndexerError>;

/// How the host should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The offending operation is refused; nothing else is affected
    Reject,
    /// Transient; the same commit may succeed if redelivered
    Retryable,
    /// Unrecoverable without operator intervention
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Reject => "REJECT",
            Severity::Retryable => "RETRYABLE",
            Severity::Fatal => "FATAL",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Severity::Fatal)
    }
}

/// Errors returned to the host.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Module declaration is invalid
    #[error("schema error: {0}")]
    Schema(SchemaError),

    /// Update values violate their field contract
    #[error("validation failed: {0}")]
    Validation(SchemaError),

    /// Stored structure diverges from the compiled schema
    #[error("schema drift on table {table:?}: {reason}")]
    SchemaDrift { table: String, reason: String },

    /// Backend refused or failed a write
    #[error("backend error: {0}")]
    Backend(StorageError),

    /// Update addressed to a module that was never initialized
    #[error("unknown module {0:?}")]
    UnknownModule(String),

    /// Operation not allowed in the current state
    #[error("{operation} is not allowed while {state}")]
    InvalidTransition {
        state: &'static str,
        operation: &'static str,
    },

    /// Indexer stopped after a fatal error
    #[error("indexer halted: {0}")]
    Halted(String),

    /// Commit cancelled before anything was written
    #[error("commit cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IndexerError {
    /// Stable error code for logs and callers.
    pub fn code(&self) -> &'static str {
        match self {
            IndexerError::Schema(e) | IndexerError::Validation(e) => e.code(),
            IndexerError::SchemaDrift { .. } => "STORAGE_SCHEMA_DRIFT",
            IndexerError::Backend(e) => e.code(),
            IndexerError::UnknownModule(_) => "INDEXER_UNKNOWN_MODULE",
            IndexerError::InvalidTransition { .. } => "INDEXER_INVALID_TRANSITION",
            IndexerError::Halted(_) => "INDEXER_HALTED",
            IndexerError::Cancelled => "INDEXER_CANCELLED",
            IndexerError::Config(e) => e.code(),
        }
    }

    /// Severity of this error.
    pub fn severity(&self) -> Severity {
        match self {
            IndexerError::Validation(_)
            | IndexerError::UnknownModule(_)
            | IndexerError::InvalidTransition { .. }
            | IndexerError::Cancelled => Severity::Reject,
            IndexerError::Backend(e) => e.severity(),
            IndexerError::Schema(_)
            | IndexerError::SchemaDrift { .. }
            | IndexerError::Halted(_)
            | IndexerError::Config(_) => Severity::Fatal,
        }
    }

    /// Returns true if redelivering the same commit may succeed.
    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Retryable
    }
}

impl From<SchemaError> for IndexerError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::UnknownModule(module) => IndexerError::UnknownModule(module),
            e if e.severity() == Severity::Reject => IndexerError::Validation(e),
            e => IndexerError::Schema(e),
        }
    }
}

impl From<StorageError> for IndexerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SchemaDrift { table, reason } => IndexerError::SchemaDrift { table, reason },
            e => IndexerError::Backend(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_split() {
        let value_err: IndexerError = SchemaError::NullNotAllowed { field: "id".into() }.into();
        assert!(matches!(value_err, IndexerError::Validation(_)));
        assert_eq!(value_err.severity(), Severity::Reject);

        let decl_err: IndexerError = SchemaError::InvalidFieldName("1x".into()).into();
        assert!(matches!(decl_err, IndexerError::Schema(_)));
        assert!(decl_err.severity().is_fatal());

        let unknown: IndexerError = SchemaError::UnknownModule("bank".into()).into();
        assert!(matches!(unknown, IndexerError::UnknownModule(_)));
    }

    #[test]
    fn test_storage_error_split() {
        let drift: IndexerError = StorageError::SchemaDrift {
            table: "t".into(),
            reason: "r".into(),
        }
        .into();
        assert!(matches!(drift, IndexerError::SchemaDrift { .. }));
        assert!(drift.severity().is_fatal());

        let transient: IndexerError = StorageError::BackendUnavailable("down".into()).into();
        assert!(transient.is_retryable());
        assert_eq!(transient.code(), "STORAGE_BACKEND_UNAVAILABLE");
    }

    #[test]
    fn test_cancelled_is_not_fatal() {
        assert_eq!(IndexerError::Cancelled.severity(), Severity::Reject);
        assert_eq!(IndexerError::Cancelled.code(), "INDEXER_CANCELLED");
    }
}
