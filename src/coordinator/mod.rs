//! Commit coordinator
//!
//! Drives the host stream as an explicit state machine: modules register,
//! updates accumulate in a change set, and each commit writes the change set
//! and the new watermarks in one atomic batch.
//!
//! # Guarantees
//!
//! - A commit is all or nothing, watermark included
//! - Replaying a committed sequence writes nothing
//! - Rejected updates leave the change set untouched
//! - Transient backend failures are retried at the commit boundary only

mod changeset;
mod indexer;
mod listener;
mod state;

pub use changeset::ChangeSet;
pub use indexer::{Clock, Indexer};
pub use listener::{CancelHandle, CommitData, CommitOutcome, Listener, ModuleInitializationData};
pub use state::IndexerState;
