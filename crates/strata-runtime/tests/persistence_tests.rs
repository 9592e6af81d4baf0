//! Integration tests for revisioned persistence through the app runtime,
//! against the in-memory and file-backed stores.

use std::sync::Arc;
use strata_core::{AttributeType, Value};
use strata_runtime::{
    AppRuntime, CollectingSink, EngineConfig, EventKind, FileStore, LengthWindow, ManualClock,
    MemoryStore, MetaStreamEvent, PersistenceStore, Processor, StreamEventCloner,
};

// ==========================================================================
// Helpers
// ==========================================================================

fn config(dir: Option<&std::path::Path>, max_revisions: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.snapshot.directory = dir.map(|d| d.to_path_buf());
    config.snapshot.max_revisions = max_revisions;
    config
}

/// App with one stream feeding a `length(2)` window into a sink.
fn deploy(app: &AppRuntime) -> (Arc<LengthWindow>, Arc<CollectingSink>) {
    let junction = app
        .define_stream("Readings", MetaStreamEvent::on_after_window_only(&[("v", AttributeType::Long)]))
        .unwrap();
    let window = LengthWindow::new(2, StreamEventCloner::new(junction.pool().clone()), &app.query("recent"));
    let sink = Arc::new(CollectingSink::new());
    window.set_next_processor(Some(sink.clone()));
    app.subscribe("Readings", "recent", window.clone()).unwrap();
    (window, sink)
}

fn send(app: &AppRuntime, ts: i64, v: i64) {
    app.input_handler("Readings").unwrap().send(ts, &[Value::Long(v)]).unwrap();
}

// ==========================================================================
// File store
// ==========================================================================

#[test]
fn test_file_store_restores_latest_revision() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(1_000));

    let app = AppRuntime::with_clock("metrics", clock.clone(), config(Some(dir.path()), 3)).unwrap();
    deploy(&app);
    send(&app, 1, 10);
    assert_eq!(app.persist().unwrap(), 1);
    send(&app, 2, 20);
    assert_eq!(app.persist().unwrap(), 2);
    drop(app);

    let app = AppRuntime::with_clock("metrics", clock, config(Some(dir.path()), 3)).unwrap();
    let (window, sink) = deploy(&app);
    assert_eq!(app.restore_last_revision().unwrap(), Some(2));
    assert_eq!(window.retained(), 2);

    send(&app, 3, 30);
    let expired = sink.events_of(EventKind::Expired);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].as_stream().unwrap().on_after_window_data, vec![Value::Long(10)]);
}

#[test]
fn test_old_revisions_are_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let app = AppRuntime::with_clock("metrics", clock, config(Some(dir.path()), 2)).unwrap();
    deploy(&app);
    for _ in 0..4 {
        app.persist().unwrap();
    }
    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.revisions("metrics").unwrap(), vec![3, 4]);
    // Revisions keep counting after pruning
    assert_eq!(app.persist().unwrap(), 5);
}

#[test]
fn test_restore_of_pruned_revision_fails() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppRuntime::with_clock("metrics", Arc::new(ManualClock::new(0)), config(Some(dir.path()), 1))
        .unwrap();
    deploy(&app);
    app.persist().unwrap();
    app.persist().unwrap();
    assert!(app.restore_revision(1).is_err());
    assert!(app.restore_revision(2).is_ok());
}

// ==========================================================================
// Memory store
// ==========================================================================

#[test]
fn test_memory_store_is_shared_by_apps() {
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(0));

    let first = AppRuntime::with_store("shared", clock.clone(), EngineConfig::default(), store.clone()).unwrap();
    deploy(&first);
    send(&first, 1, 7);
    first.persist().unwrap();

    let second = AppRuntime::with_store("shared", clock, EngineConfig::default(), store.clone()).unwrap();
    let (window, _) = deploy(&second);
    assert_eq!(second.restore_last_revision().unwrap(), Some(1));
    assert_eq!(window.retained(), 1);
    assert_eq!(store.revisions("other").unwrap(), Vec::<u64>::new());
}
