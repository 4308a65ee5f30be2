//! Observable indexer events
//!
//! Every log line the indexer emits carries one of these as its `event`
//! field, so logs can be filtered on a closed vocabulary.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded and validated
    ConfigLoaded,

    // Schema
    /// Module schema validated and registered
    ModuleRegistered,
    /// Module declaration rejected
    ModuleRejected,

    // Storage
    /// Table created from a compiled object type
    TableCreated,
    /// Additive columns added to an existing table
    TableExtended,
    /// Stored table diverges from its compiled definition (FATAL)
    SchemaDrift,
    /// Persisted watermark loaded
    WatermarkLoaded,

    // Updates
    /// Object update staged in the change set
    UpdateStaged,
    /// Object update failed validation
    UpdateRejected,

    // Commit
    /// Commit started
    CommitBegin,
    /// Batch applied together with new watermarks
    CommitApplied,
    /// Sequence at or below the watermark, nothing written
    CommitSkipped,
    /// Transient backend failure, retrying
    CommitRetry,
    /// Commit failed and was rolled back
    CommitFailed,
    /// Commit cancelled before apply
    CommitCancelled,

    // Lifecycle
    /// Indexer stopped accepting work (FATAL)
    IndexerHalted,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::ModuleRegistered => "MODULE_REGISTERED",
            Event::ModuleRejected => "MODULE_REJECTED",

            Event::TableCreated => "TABLE_CREATED",
            Event::TableExtended => "TABLE_EXTENDED",
            Event::SchemaDrift => "SCHEMA_DRIFT",
            Event::WatermarkLoaded => "WATERMARK_LOADED",

            Event::UpdateStaged => "UPDATE_STAGED",
            Event::UpdateRejected => "UPDATE_REJECTED",

            Event::CommitBegin => "COMMIT_BEGIN",
            Event::CommitApplied => "COMMIT_APPLIED",
            Event::CommitSkipped => "COMMIT_SKIPPED",
            Event::CommitRetry => "COMMIT_RETRY",
            Event::CommitFailed => "COMMIT_FAILED",
            Event::CommitCancelled => "COMMIT_CANCELLED",

            Event::IndexerHalted => "INDEXER_HALTED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::SchemaDrift | Event::IndexerHalted)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
