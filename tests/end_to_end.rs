//! End-to-End Indexing Tests
//!
//! Drives an indexer through the listener contract the way a host does:
//! initialize a module, stream updates, commit, read back.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use schema_indexer::schema::{Field, Kind, ModuleSchema, ObjectType, Value};
use schema_indexer::storage::{Cell, MemoryBackend, Row, RowView};
use schema_indexer::{
    CommitData, CommitOutcome, Indexer, IndexerConfig, IndexerError, IndexerState, Listener,
    ModuleInitializationData, ObjectUpdate,
};

fn fixed_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn test_schema() -> ModuleSchema {
    ModuleSchema::new().with_object(ObjectType::new(
        "counters",
        vec![Field::new("id", Kind::String)],
        vec![Field::new("count", Kind::Uint32).nullable()],
    ))
}

fn setup(retain_deletions: bool) -> (Arc<MemoryBackend>, Indexer) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let backend = Arc::new(MemoryBackend::new());
    let config = IndexerConfig {
        retain_deletions,
        retry_backoff_ms: 0,
        ..IndexerConfig::default()
    };
    let mut indexer = Indexer::new(config, backend.clone()).unwrap().with_clock(fixed_clock);
    indexer
        .initialize_module_data(ModuleInitializationData::new("test", test_schema()))
        .unwrap();
    (backend, indexer)
}

fn set(id: &str, count: Option<u64>) -> ObjectUpdate {
    ObjectUpdate::upsert("counters", vec![Value::from(id)], vec![count.map(Value::Uint)])
}

fn delete(id: &str) -> ObjectUpdate {
    ObjectUpdate::delete("counters", vec![Value::from(id)])
}

fn ids(rows: &[Row]) -> Vec<&str> {
    rows.iter().filter_map(|r| r.get("id").and_then(Cell::as_text)).collect()
}

/// Runs the reference scenario and returns (live rows, all rows).
fn scenario(indexer: &mut Indexer) -> (Vec<Row>, Vec<Row>) {
    indexer.on_object_update("test", set("a", Some(1))).unwrap();
    indexer.on_object_update("test", set("b", None)).unwrap();
    assert_eq!(
        indexer.commit(CommitData::new(1)).unwrap(),
        CommitOutcome::Applied { sequence: 1, rows: 2 }
    );

    indexer.on_object_update("test", set("a", Some(2))).unwrap();
    indexer.on_object_update("test", delete("b")).unwrap();
    indexer.commit(CommitData::new(2)).unwrap();

    (
        indexer.rows("test", "counters", RowView::Live).unwrap(),
        indexer.rows("test", "counters", RowView::IncludeTombstoned).unwrap(),
    )
}

#[test]
fn test_scenario_with_retention() {
    let (_backend, mut indexer) = setup(true);
    let (live, all) = scenario(&mut indexer);

    assert_eq!(ids(&live), vec!["a"]);
    assert_eq!(live[0].get("count"), Some(&Cell::Int(2)));

    assert_eq!(ids(&all), vec!["a", "b"]);
    let b = &all[1];
    assert!(b.is_tombstoned());
    assert_eq!(b.deleted_at(), Some(fixed_clock()));
    assert_eq!(b.get("count"), Some(&Cell::Null));

    assert_eq!(indexer.watermark("test"), Some(2));
}

#[test]
fn test_scenario_without_retention() {
    let (backend, mut indexer) = setup(false);
    let (live, all) = scenario(&mut indexer);

    assert_eq!(ids(&live), vec!["a"]);
    assert_eq!(live, all);
    assert!(live[0].get("_deleted").is_none());

    let dump = backend.dump();
    assert_eq!(dump["test_counters"].len(), 1);
}

/// Insert, update and delete one key, one commit each.
fn single_key_lifecycle(indexer: &mut Indexer) {
    indexer.on_object_update("test", set("a", Some(1))).unwrap();
    indexer.commit(CommitData::new(1)).unwrap();
    indexer.on_object_update("test", set("a", Some(2))).unwrap();
    indexer.commit(CommitData::new(2)).unwrap();
    indexer.on_object_update("test", delete("a")).unwrap();
    indexer.commit(CommitData::new(3)).unwrap();
}

#[test]
fn test_single_key_lifecycle_with_retention() {
    let (_backend, mut indexer) = setup(true);
    single_key_lifecycle(&mut indexer);

    assert!(indexer.rows("test", "counters", RowView::Live).unwrap().is_empty());
    let all = indexer.rows("test", "counters", RowView::IncludeTombstoned).unwrap();
    assert_eq!(ids(&all), vec!["a"]);
    assert!(all[0].is_tombstoned());
    assert_eq!(all[0].deleted_at(), Some(fixed_clock()));
    assert_eq!(all[0].get("count"), Some(&Cell::Int(2)));
    assert_eq!(indexer.watermark("test"), Some(3));
}

#[test]
fn test_single_key_lifecycle_without_retention() {
    let (backend, mut indexer) = setup(false);
    single_key_lifecycle(&mut indexer);

    assert!(indexer
        .rows("test", "counters", RowView::IncludeTombstoned)
        .unwrap()
        .is_empty());
    assert!(backend.dump()["test_counters"].is_empty());
    assert_eq!(indexer.watermark("test"), Some(3));
}

#[test]
fn test_table_name_collision_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let mut indexer = Indexer::new(IndexerConfig::default(), backend.clone()).unwrap();
    let object = |name: &str| {
        ModuleSchema::new().with_object(ObjectType::new(name, vec![Field::new("id", Kind::String)], vec![]))
    };

    indexer
        .initialize_module_data(ModuleInitializationData::new("a", object("b_c")))
        .unwrap();
    let err = indexer
        .initialize_module_data(ModuleInitializationData::new("a_b", object("c")))
        .unwrap_err();
    assert_eq!(err.code(), "SCHEMA_TABLE_NAME_CONFLICT");
    assert!(indexer.registry().module("a_b").is_none());
    assert_eq!(indexer.state(), IndexerState::Idle);

    let err = indexer
        .initialize_module_data(ModuleInitializationData::new("_indexer", object("watermarks")))
        .unwrap_err();
    assert_eq!(err.code(), "SCHEMA_TABLE_NAME_CONFLICT");

    // The first owner keeps working.
    indexer
        .on_object_update("a", ObjectUpdate::upsert("b_c", vec![Value::from("x")], vec![]))
        .unwrap();
    indexer.commit(CommitData::new(1)).unwrap();
    assert_eq!(indexer.rows("a", "b_c", RowView::Live).unwrap().len(), 1);
    assert!(backend.dump().contains_key("a_b_c"));
}

#[test]
fn test_object_level_opt_out() {
    let backend = Arc::new(MemoryBackend::new());
    let mut indexer = Indexer::new(IndexerConfig::default(), backend).unwrap();
    let schema = ModuleSchema::new().with_object(
        ObjectType::new("counters", vec![Field::new("id", Kind::String)], vec![])
            .with_retain_deletions(false),
    );
    indexer
        .initialize_module_data(ModuleInitializationData::new("test", schema))
        .unwrap();

    let table = indexer.table("test", "counters").unwrap();
    assert!(!table.retains_deletions());
}

#[test]
fn test_last_write_in_change_set_wins() {
    let (_backend, mut indexer) = setup(true);
    indexer.on_object_update("test", set("a", Some(1))).unwrap();
    indexer.on_object_update("test", set("a", Some(5))).unwrap();
    indexer.on_object_update("test", delete("a")).unwrap();
    indexer.on_object_update("test", set("a", Some(9))).unwrap();
    indexer.commit(CommitData::new(1)).unwrap();

    let live = indexer.rows("test", "counters", RowView::Live).unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].get("count"), Some(&Cell::Int(9)));
    assert!(!live[0].is_tombstoned());
}

#[test]
fn test_nothing_visible_before_commit() {
    let (_backend, mut indexer) = setup(true);
    indexer.on_object_update("test", set("a", Some(1))).unwrap();

    assert_eq!(indexer.state(), IndexerState::Accumulating);
    assert_eq!(indexer.pending(), 1);
    assert!(indexer.rows("test", "counters", RowView::IncludeTombstoned).unwrap().is_empty());
}

#[test]
fn test_rejected_update_leaves_change_set() {
    let (_backend, mut indexer) = setup(true);
    indexer.on_object_update("test", set("a", Some(1))).unwrap();

    // u32 overflow
    let err = indexer
        .on_object_update("test", set("b", Some(u64::from(u32::MAX) + 1)))
        .unwrap_err();
    assert!(matches!(err, IndexerError::Validation(_)));

    // wrong runtime type for the key
    let err = indexer
        .on_object_update("test", ObjectUpdate::upsert("counters", vec![Value::Int(1)], vec![None]))
        .unwrap_err();
    assert!(matches!(err, IndexerError::Validation(_)));

    assert_eq!(indexer.pending(), 1);
    assert_eq!(indexer.state(), IndexerState::Accumulating);
    assert_eq!(indexer.metrics().updates_rejected, 2);

    indexer.commit(CommitData::new(1)).unwrap();
    assert_eq!(indexer.rows("test", "counters", RowView::Live).unwrap().len(), 1);
}

#[test]
fn test_unknown_module_and_object() {
    let (_backend, mut indexer) = setup(true);
    assert!(matches!(
        indexer.on_object_update("bank", set("a", Some(1))),
        Err(IndexerError::UnknownModule(_))
    ));
    assert!(matches!(
        indexer.on_object_update("test", ObjectUpdate::delete("balances", vec![Value::from("a")])),
        Err(IndexerError::Validation(_))
    ));
    assert_eq!(indexer.state(), IndexerState::Idle);
}

#[test]
fn test_initialization_needs_closed_change_set() {
    let (_backend, mut indexer) = setup(true);
    indexer.on_object_update("test", set("a", Some(1))).unwrap();

    let err = indexer
        .initialize_module_data(ModuleInitializationData::new("bank", ModuleSchema::new()))
        .unwrap_err();
    assert!(matches!(err, IndexerError::InvalidTransition { .. }));

    indexer.commit(CommitData::new(1)).unwrap();
    indexer
        .initialize_module_data(ModuleInitializationData::new("bank", ModuleSchema::new()))
        .unwrap();
}

#[test]
fn test_invalid_schema_rejected_at_initialization() {
    let backend = Arc::new(MemoryBackend::new());
    let mut indexer = Indexer::new(IndexerConfig::default(), backend).unwrap();
    let schema = ModuleSchema::new().with_object(ObjectType::new(
        "counters",
        vec![Field::new("id", Kind::String).nullable()],
        vec![],
    ));

    let err = indexer
        .initialize_module_data(ModuleInitializationData::new("test", schema))
        .unwrap_err();
    assert!(matches!(err, IndexerError::Schema(_)));
    assert!(err.severity().is_fatal());
    assert!(!indexer.registry().contains("test"));
}

#[test]
fn test_duplicate_module_rejected() {
    let (_backend, mut indexer) = setup(true);
    let err = indexer
        .initialize_module_data(ModuleInitializationData::new("test", test_schema()))
        .unwrap_err();
    assert_eq!(err.code(), "SCHEMA_DUPLICATE_MODULE");
}

#[test]
fn test_restart_resumes_from_watermark() {
    let (backend, mut indexer) = setup(true);
    scenario(&mut indexer);
    drop(indexer);

    let config = IndexerConfig {
        retry_backoff_ms: 0,
        ..IndexerConfig::default()
    };
    let mut restarted = Indexer::new(config, backend.clone()).unwrap();
    restarted
        .initialize_module_data(ModuleInitializationData::new("test", test_schema()))
        .unwrap();
    assert_eq!(restarted.watermark("test"), Some(2));

    let before = backend.dump();
    restarted.on_object_update("test", set("a", Some(100))).unwrap();
    assert_eq!(
        restarted.commit(CommitData::new(2)).unwrap(),
        CommitOutcome::AlreadyApplied { sequence: 2 }
    );
    assert_eq!(backend.dump(), before);
}
