//! The change set staged between two commits
//!
//! - Operations keep their staging order; a later write to the same row
//!   wins when the batch is applied
//! - Nothing staged is visible to readers until commit

use crate::storage::{RowOp, WriteBatch};

#[derive(Debug, Clone, PartialEq)]
struct StagedOp {
    module: String,
    op: RowOp,
}

/// Row operations awaiting the next commit.
#[derive(Debug, Default)]
pub struct ChangeSet {
    staged: Vec<StagedOp>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an operation produced for `module`.
    pub fn push(&mut self, module: &str, op: RowOp) {
        self.staged.push(StagedOp {
            module: module.to_string(),
            op,
        });
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Number of operations staged for `module`.
    pub fn count_for(&self, module: &str) -> usize {
        self.staged.iter().filter(|s| s.module == module).count()
    }

    /// Consumes the change set into a batch holding the operations of the
    /// modules `keep` accepts. Operations of other modules are dropped.
    pub fn into_batch(self, keep: impl Fn(&str) -> bool) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for staged in self.staged {
            if keep(&staged.module) {
                batch.push(staged.op);
            }
        }
        batch
    }
}
