//! Indexer lifecycle states
//!
//! ```text
//! Idle ──init──▶ ModuleRegistering ──ok──▶ Idle
//! Idle | Accumulating ──update──▶ Accumulating
//! Idle | Accumulating ──commit──▶ Committing ──▶ Idle
//! any ──fatal──▶ Halted
//! ```
//!
//! `ModuleRegistering` and `Committing` only exist for the duration of one
//! call. `Halted` is terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    /// No change set open
    Idle,
    /// Module tables being compiled and reconciled
    ModuleRegistering,
    /// Change set open, updates being staged
    Accumulating,
    /// Change set being written
    Committing,
    /// Stopped after a fatal error
    Halted,
}

impl IndexerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerState::Idle => "idle",
            IndexerState::ModuleRegistering => "registering a module",
            IndexerState::Accumulating => "accumulating a change set",
            IndexerState::Committing => "committing",
            IndexerState::Halted => "halted",
        }
    }

    /// Module registration needs a closed change set.
    pub fn can_register(&self) -> bool {
        matches!(self, IndexerState::Idle)
    }

    /// Updates and commits are accepted with or without an open change set.
    pub fn can_stage(&self) -> bool {
        matches!(self, IndexerState::Idle | IndexerState::Accumulating)
    }
}

impl fmt::Display for IndexerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
