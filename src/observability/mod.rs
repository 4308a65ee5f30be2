//! Observability for the indexer
//!
//! - Structured logging through `tracing`, one `event` field per line
//! - Counters in `IndexerMetrics`
//!
//! Log targets are `indexer::schema`, `indexer::storage` and
//! `indexer::commit`. Observability is read-only: nothing here affects
//! what gets written.

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{IndexerMetrics, MetricsSnapshot};
