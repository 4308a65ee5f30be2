//! The contract a host drives
//!
//! A host streams data to the indexer through these calls, in order:
//! initialize each module once, then for each block report object updates
//! followed by one commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::applier::ObjectUpdate;
use crate::errors::IndexerResult;
use crate::schema::ModuleSchema;

/// Schema declaration of one producing module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInitializationData {
    pub module_name: String,
    pub schema: ModuleSchema,
}

impl ModuleInitializationData {
    pub fn new(module_name: impl Into<String>, schema: ModuleSchema) -> Self {
        Self {
            module_name: module_name.into(),
            schema,
        }
    }
}

/// Closes the current change set at `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    /// Monotonic position in the host's stream, typically a block height
    pub sequence: u64,
}

impl CommitData {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The change set was written; `rows` operations were applied
    Applied { sequence: u64, rows: usize },
    /// Every module had already committed this sequence; nothing was written
    AlreadyApplied { sequence: u64 },
}

/// Requests cancellation of the next commit.
///
/// A commit checks the handle before every apply attempt. Once a commit
/// observes the request it aborts with `Cancelled` and clears the request.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    requested: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Consumes a pending request.
    pub(crate) fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

/// Calls a host makes on an indexer.
pub trait Listener {
    /// Registers a module and prepares its tables. Only valid with no open
    /// change set.
    fn initialize_module_data(&mut self, data: ModuleInitializationData) -> IndexerResult<()>;

    /// Validates and stages one object update.
    fn on_object_update(&mut self, module: &str, update: ObjectUpdate) -> IndexerResult<()>;

    /// Writes the staged change set atomically with the new watermarks.
    fn commit(&mut self, data: CommitData) -> IndexerResult<CommitOutcome>;
}
