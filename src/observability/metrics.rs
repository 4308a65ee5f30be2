//! Indexer counters
//!
//! - Counters only, monotonic
//! - Reset only when the indexer is created
//! - Thread-safe, lock-free

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters of one indexer.
///
/// Uses Relaxed ordering; counters are read for reporting only.
#[derive(Debug, Default)]
pub struct IndexerMetrics {
    /// Commits that wrote a batch
    commits_applied: AtomicU64,
    /// Commits at or below the watermark
    commits_skipped: AtomicU64,
    /// Commits that failed and rolled back
    commits_failed: AtomicU64,
    /// Apply attempts repeated after a transient failure
    commit_retries: AtomicU64,
    rows_upserted: AtomicU64,
    rows_deleted: AtomicU64,
    rows_tombstoned: AtomicU64,
    /// Object updates that failed validation
    updates_rejected: AtomicU64,
}

impl IndexerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_commits_applied(&self) {
        self.commits_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commits_skipped(&self) {
        self.commits_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commits_failed(&self) {
        self.commits_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commit_retries(&self) {
        self.commit_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds the row counts of one applied batch.
    pub fn add_rows(&self, upserted: u64, deleted: u64, tombstoned: u64) {
        self.rows_upserted.fetch_add(upserted, Ordering::Relaxed);
        self.rows_deleted.fetch_add(deleted, Ordering::Relaxed);
        self.rows_tombstoned.fetch_add(tombstoned, Ordering::Relaxed);
    }

    pub fn increment_updates_rejected(&self) {
        self.updates_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits_applied: self.commits_applied.load(Ordering::Relaxed),
            commits_skipped: self.commits_skipped.load(Ordering::Relaxed),
            commits_failed: self.commits_failed.load(Ordering::Relaxed),
            commit_retries: self.commit_retries.load(Ordering::Relaxed),
            rows_upserted: self.rows_upserted.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted.load(Ordering::Relaxed),
            rows_tombstoned: self.rows_tombstoned.load(Ordering::Relaxed),
            updates_rejected: self.updates_rejected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub commits_applied: u64,
    pub commits_skipped: u64,
    pub commits_failed: u64,
    pub commit_retries: u64,
    pub rows_upserted: u64,
    pub rows_deleted: u64,
    pub rows_tombstoned: u64,
    pub updates_rejected: u64,
}
