//! The indexer: schema registry, change set and commit protocol
//!
//! # Commit protocol
//!
//! 1. Modules whose watermark is at or above the commit sequence drop their
//!    staged operations; the sequence was applied before
//! 2. The remaining operations and one watermark per remaining module form a
//!    single `WriteBatch`
//! 3. The batch is applied atomically; transient failures are retried with
//!    exponential backoff, and only here
//! 4. On failure the change set is discarded and watermarks stay put, so the
//!    host can redeliver the block

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::applier::{ChangeApplier, ObjectUpdate, OpCounts};
use crate::config::IndexerConfig;
use crate::errors::{IndexerError, IndexerResult, Severity};
use crate::observability::{Event, IndexerMetrics, MetricsSnapshot};
use crate::schema::{ModuleSchema, SchemaError, SchemaRegistry};
use crate::storage::{
    compile, ensure_schema, table_name, watermark_table_spec, Backend, EnsureOutcome, Row, RowOp, RowView,
    TableSpec, WriteBatch, WATERMARK_TABLE,
};

use super::changeset::ChangeSet;
use super::listener::{CancelHandle, CommitData, CommitOutcome, Listener, ModuleInitializationData};
use super::state::IndexerState;

/// Source of deletion timestamps.
pub type Clock = fn() -> DateTime<Utc>;

/// Materializes module data into a relational backend.
pub struct Indexer {
    config: IndexerConfig,
    backend: Arc<dyn Backend>,
    registry: SchemaRegistry,
    /// Compiled tables by (module, object type)
    tables: BTreeMap<(String, String), TableSpec>,
    /// Last committed sequence per registered module
    watermarks: BTreeMap<String, Option<u64>>,
    changes: ChangeSet,
    state: IndexerState,
    halt_reason: Option<String>,
    cancel: CancelHandle,
    metrics: IndexerMetrics,
    clock: Clock,
}

impl Indexer {
    /// Creates an indexer writing to `backend`.
    ///
    /// Validates the configuration and makes sure the watermark table exists.
    pub fn new(config: IndexerConfig, backend: Arc<dyn Backend>) -> IndexerResult<Self> {
        config.validate()?;
        ensure_schema(backend.as_ref(), &watermark_table_spec())?;

        Ok(Self {
            config,
            backend,
            registry: SchemaRegistry::new(),
            tables: BTreeMap::new(),
            watermarks: BTreeMap::new(),
            changes: ChangeSet::new(),
            state: IndexerState::Idle,
            halt_reason: None,
            cancel: CancelHandle::new(),
            metrics: IndexerMetrics::new(),
            clock: Utc::now,
        })
    }

    /// Replaces the clock used to stamp tombstones.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    /// Why the indexer halted, if it did.
    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Handle that cancels the next commit.
    ///
    /// A request is consumed by the next commit that runs, including one that
    /// ends without writing.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Last committed sequence of a registered module.
    pub fn watermark(&self, module: &str) -> Option<u64> {
        self.watermarks.get(module).copied().flatten()
    }

    /// Number of operations in the open change set.
    pub fn pending(&self) -> usize {
        self.changes.len()
    }

    /// Compiled table of an object type.
    pub fn table(&self, module: &str, object: &str) -> IndexerResult<&TableSpec> {
        self.registry.lookup(module, object)?;
        self.tables
            .get(&(module.to_string(), object.to_string()))
            .ok_or_else(|| {
                IndexerError::Validation(SchemaError::UnknownObject {
                    module: module.to_string(),
                    object: object.to_string(),
                })
            })
    }

    /// Committed rows of an object type.
    pub fn rows(&self, module: &str, object: &str, view: RowView) -> IndexerResult<Vec<Row>> {
        let table = self.table(module, object)?;
        Ok(self.backend.select(&table.name, view)?)
    }

    fn check_halted(&self) -> IndexerResult<()> {
        if self.state == IndexerState::Halted {
            return Err(IndexerError::Halted(self.halt_reason.clone().unwrap_or_default()));
        }
        Ok(())
    }

    fn halt(&mut self, err: &IndexerError) {
        error!(
            target: "indexer::commit",
            event = Event::IndexerHalted.as_str(),
            code = err.code(),
            error = %err,
        );
        self.state = IndexerState::Halted;
        self.halt_reason = Some(err.to_string());
        self.changes = ChangeSet::new();
    }

    /// Rejects a module whose table names are taken by another object type
    /// or by the watermark table.
    fn check_table_names(&self, module: &str, schema: &ModuleSchema) -> Result<(), SchemaError> {
        for object in &schema.object_types {
            let table = table_name(module, &object.name);
            let owner = if table == WATERMARK_TABLE {
                Some("the watermark table".to_string())
            } else {
                self.tables
                    .iter()
                    .find(|(_, spec)| spec.name == table)
                    .map(|((m, o), _)| format!("object type {:?} of module {:?}", o, m))
            };
            if let Some(owner) = owner {
                return Err(SchemaError::TableNameConflict {
                    table,
                    module: module.to_string(),
                    object: object.name.clone(),
                    owner,
                });
            }
        }
        Ok(())
    }

    /// Compiles and reconciles every object table of a registered module and
    /// loads its watermark.
    fn prepare_module(&mut self, module: &str, schema: &ModuleSchema) -> IndexerResult<()> {
        let mut compiled = Vec::with_capacity(schema.object_types.len());
        for object in &schema.object_types {
            let retain = self.config.retains_deletions(object.retain_deletions);
            let table = compile(module, object, schema, retain);
            match ensure_schema(self.backend.as_ref(), &table)? {
                EnsureOutcome::Extended(columns) => {
                    debug!(target: "indexer::schema", module, table = %table.name, added = columns.len())
                }
                EnsureOutcome::Created | EnsureOutcome::Unchanged => {}
            }
            compiled.push(((module.to_string(), object.name.clone()), table));
        }

        let watermark = self.backend.watermark(module)?;
        info!(
            target: "indexer::schema",
            event = Event::WatermarkLoaded.as_str(),
            module,
            watermark = ?watermark,
        );

        self.tables.extend(compiled);
        self.watermarks.insert(module.to_string(), watermark);
        Ok(())
    }

    /// Resolves the target table of `update` and turns it into a row operation.
    fn stage(&self, module: &str, update: &ObjectUpdate) -> IndexerResult<RowOp> {
        let schema = self
            .registry
            .module(module)
            .ok_or_else(|| IndexerError::UnknownModule(module.to_string()))?;
        let object = self.registry.lookup(module, &update.type_name)?;
        let table = self.table(module, &update.type_name)?;
        ChangeApplier::new(object, table, schema.as_ref()).apply(update, (self.clock)())
    }

    /// Applies `batch`, retrying transient failures.
    fn apply_with_retry(&self, batch: &WriteBatch, sequence: u64) -> IndexerResult<()> {
        let mut attempt = 0;
        loop {
            if self.cancel.take() {
                return Err(IndexerError::Cancelled);
            }
            match self.backend.apply(batch) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.commit_retries => {
                    attempt += 1;
                    self.metrics.increment_commit_retries();
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        target: "indexer::commit",
                        event = Event::CommitRetry.as_str(),
                        sequence,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                    );
                    thread::sleep(backoff);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Listener for Indexer {
    fn initialize_module_data(&mut self, data: ModuleInitializationData) -> IndexerResult<()> {
        self.check_halted()?;
        if !self.state.can_register() {
            return Err(IndexerError::InvalidTransition {
                state: self.state.as_str(),
                operation: "module initialization",
            });
        }

        let module = data.module_name;
        self.state = IndexerState::ModuleRegistering;

        let mut registered = self.registry.register(&module, data.schema);
        let names = match &registered {
            Ok(schema) => self.check_table_names(&module, schema),
            Err(_) => Ok(()),
        };
        if let Err(e) = names {
            self.registry.remove(&module);
            registered = Err(e);
        }
        let schema = match registered {
            Ok(schema) => schema,
            Err(e) => {
                warn!(
                    target: "indexer::schema",
                    event = Event::ModuleRejected.as_str(),
                    module = %module,
                    code = e.code(),
                    error = %e,
                );
                self.state = IndexerState::Idle;
                return Err(IndexerError::Schema(e));
            }
        };

        if let Err(e) = self.prepare_module(&module, &schema) {
            self.registry.remove(&module);
            if e.severity().is_fatal() {
                self.halt(&e);
            } else {
                self.state = IndexerState::Idle;
            }
            return Err(e);
        }

        info!(
            target: "indexer::schema",
            event = Event::ModuleRegistered.as_str(),
            module = %module,
            object_types = schema.object_types.len(),
        );
        self.state = IndexerState::Idle;
        Ok(())
    }

    fn on_object_update(&mut self, module: &str, update: ObjectUpdate) -> IndexerResult<()> {
        self.check_halted()?;
        if !self.state.can_stage() {
            return Err(IndexerError::InvalidTransition {
                state: self.state.as_str(),
                operation: "object update",
            });
        }

        let op = match self.stage(module, &update) {
            Ok(op) => op,
            Err(e) => {
                self.metrics.increment_updates_rejected();
                warn!(
                    target: "indexer::commit",
                    event = Event::UpdateRejected.as_str(),
                    module,
                    object = %update.type_name,
                    code = e.code(),
                    error = %e,
                );
                return Err(e);
            }
        };

        debug!(
            target: "indexer::commit",
            event = Event::UpdateStaged.as_str(),
            module,
            table = op.table(),
            delete = update.delete,
        );
        self.changes.push(module, op);
        self.state = IndexerState::Accumulating;
        Ok(())
    }

    fn commit(&mut self, data: CommitData) -> IndexerResult<CommitOutcome> {
        self.check_halted()?;
        if !self.state.can_stage() {
            return Err(IndexerError::InvalidTransition {
                state: self.state.as_str(),
                operation: "commit",
            });
        }

        let sequence = data.sequence;
        self.state = IndexerState::Committing;
        let changes = std::mem::take(&mut self.changes);
        info!(
            target: "indexer::commit",
            event = Event::CommitBegin.as_str(),
            sequence,
            staged = changes.len(),
        );

        let mut pending = Vec::new();
        let mut applied = Vec::new();
        for (module, watermark) in &self.watermarks {
            match watermark {
                Some(w) if *w >= sequence => applied.push(module.clone()),
                _ => pending.push(module.clone()),
            }
        }

        for module in &applied {
            info!(
                target: "indexer::commit",
                event = Event::CommitSkipped.as_str(),
                module = %module,
                sequence,
                dropped = changes.count_for(module),
            );
        }
        if pending.is_empty() && !applied.is_empty() {
            // Nothing to write, so a pending cancel has nothing to stop.
            self.cancel.take();
            self.metrics.increment_commits_skipped();
            self.state = IndexerState::Idle;
            return Ok(CommitOutcome::AlreadyApplied { sequence });
        }

        let mut batch = changes.into_batch(|module| pending.iter().any(|m| m == module));
        for module in &pending {
            batch.set_watermark(module.as_str(), sequence);
        }

        if batch.is_empty() {
            self.cancel.take();
            self.state = IndexerState::Idle;
            return Ok(CommitOutcome::Applied { sequence, rows: 0 });
        }

        match self.apply_with_retry(&batch, sequence) {
            Ok(()) => {
                let counts = OpCounts::of(&batch.ops);
                self.metrics.add_rows(counts.upserted, counts.deleted, counts.tombstoned);
                self.metrics.increment_commits_applied();
                for module in pending {
                    self.watermarks.insert(module, Some(sequence));
                }
                info!(
                    target: "indexer::commit",
                    event = Event::CommitApplied.as_str(),
                    sequence,
                    rows = batch.ops.len(),
                    upserted = counts.upserted,
                    deleted = counts.deleted,
                    tombstoned = counts.tombstoned,
                );
                self.state = IndexerState::Idle;
                Ok(CommitOutcome::Applied {
                    sequence,
                    rows: batch.ops.len(),
                })
            }
            Err(IndexerError::Cancelled) => {
                info!(target: "indexer::commit", event = Event::CommitCancelled.as_str(), sequence);
                self.state = IndexerState::Idle;
                Err(IndexerError::Cancelled)
            }
            Err(e) => {
                self.metrics.increment_commits_failed();
                warn!(
                    target: "indexer::commit",
                    event = Event::CommitFailed.as_str(),
                    sequence,
                    code = e.code(),
                    severity = e.severity().as_str(),
                    error = %e,
                );
                if e.severity() == Severity::Fatal {
                    self.halt(&e);
                } else {
                    self.state = IndexerState::Idle;
                }
                Err(e)
            }
        }
    }
}
