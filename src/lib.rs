//! schema-indexer - A strict, deterministic, schema-driven relational indexer
//!
//! Producing modules declare their object types once; the indexer compiles
//! them into relational tables and mirrors every update into a backend,
//! committing each block atomically with a per-module watermark so replays
//! are harmless.
//!
//! ```ignore
//! use std::sync::Arc;
//! use schema_indexer::{CommitData, Indexer, IndexerConfig, Listener, MemoryBackend};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let mut indexer = Indexer::new(IndexerConfig::default(), backend)?;
//! indexer.initialize_module_data(init)?;
//! indexer.on_object_update("test", update)?;
//! indexer.commit(CommitData::new(1))?;
//! ```

pub mod applier;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod observability;
pub mod schema;
pub mod storage;

pub use applier::{ChangeApplier, ObjectUpdate};
pub use config::{ConfigError, IndexerConfig};
pub use coordinator::{
    CancelHandle, CommitData, CommitOutcome, Indexer, IndexerState, Listener, ModuleInitializationData,
};
pub use errors::{IndexerError, IndexerResult, Severity};
pub use schema::{Field, Kind, ModuleSchema, ObjectType, SchemaError, SchemaRegistry, Value};
pub use storage::{Backend, MemoryBackend, Row, RowView, StorageError};
