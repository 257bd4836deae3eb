//! Sync engine scenarios against an in-memory remote
//!
//! These tests exercise full sync cycles: first push, first pull, the
//! four-way divergence comparison, conflict detection, and manual
//! resolution. The remote is in-memory with GitHub-like revision checks;
//! the local store is a real file in a temp directory.

mod common;

use almanac::{
    layout, AppData, LocalStore, Memo, RemotePaths, Resolution, SyncEngine, SyncError,
    SyncOutcome, Task,
};
use chrono::{DateTime, Duration, Utc};
use common::MemoryRemote;
use tempfile::TempDir;

const BASE_PATH: &str = "data/tasks.json";

fn paths() -> RemotePaths {
    RemotePaths::new(BASE_PATH)
}

fn engine_for(remote: &MemoryRemote, dir: &TempDir) -> SyncEngine {
    let store = LocalStore::open(dir.path().join("almanac.json"));
    SyncEngine::new(store, Box::new(remote.clone()), paths())
}

/// Seed the remote under the split layout, with every file carrying the
/// given last-modified stamp.
fn seed_split(remote: &MemoryRemote, data: &AppData, modified: DateTime<Utc>) {
    let files = layout::split_data(data);
    let payloads = [
        ("data/tasks.json", serde_json::to_string(&files.tasks).unwrap()),
        ("data/memos.json", serde_json::to_string(&files.memos).unwrap()),
        ("data/dailyRecords.json", serde_json::to_string(&files.daily).unwrap()),
        ("data/goals.json", serde_json::to_string(&files.goals).unwrap()),
        ("data/settings.json", serde_json::to_string(&files.settings).unwrap()),
    ];
    for (path, content) in payloads {
        remote.seed_file(path, &content, Some(modified));
    }
}

fn tasks_named(names: &[&str]) -> AppData {
    let mut data = AppData::empty();
    for name in names {
        data.tasks.push(Task::new(*name));
    }
    data
}

fn without_marker(mut data: AppData) -> AppData {
    data.last_synced = None;
    data
}

// =============================================================================
// First contact: empty remote, fresh device
// =============================================================================

#[test]
fn absent_remote_gets_local_push_under_split_layout() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let mut engine = engine_for(&remote, &dir);

    engine.store().save(&tasks_named(&["a", "b", "c"])).unwrap();

    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Pushed);

    for file in [
        "data/tasks.json",
        "data/memos.json",
        "data/dailyRecords.json",
        "data/goals.json",
        "data/settings.json",
    ] {
        assert!(remote.has_file(file), "missing {}", file);
    }
    let tasks: serde_json::Value =
        serde_json::from_str(&remote.content("data/tasks.json").unwrap()).unwrap();
    assert_eq!(tasks["tasks"].as_array().unwrap().len(), 3);

    // The marker advanced only after the push succeeded
    assert!(engine.store().load().unwrap().last_synced.is_some());
}

#[test]
fn fresh_device_adopts_remote_wholesale() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let mut remote_data = tasks_named(&["from remote"]);
    remote_data.memos.push(Memo::new("remote memo"));
    seed_split(&remote, &remote_data, Utc::now());

    let mut engine = engine_for(&remote, &dir);
    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Pulled);

    let local = engine.store().load().unwrap();
    assert!(local.last_synced.is_some());
    assert_eq!(without_marker(local), without_marker(remote_data));
}

#[test]
fn fresh_device_pulls_from_legacy_layout_too() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let remote_data = tasks_named(&["legacy task"]);
    remote.seed_file(
        BASE_PATH,
        &serde_json::to_string(&remote_data).unwrap(),
        Some(Utc::now()),
    );

    let mut engine = engine_for(&remote, &dir);
    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Pulled);
    assert_eq!(
        without_marker(engine.store().load().unwrap()).tasks[0].title,
        "legacy task"
    );
}

// =============================================================================
// The four-way comparison
// =============================================================================

#[test]
fn no_op_sync_issues_no_writes() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let base = Utc::now();

    seed_split(&remote, &tasks_named(&["shared"]), base - Duration::hours(2));

    let mut engine = engine_for(&remote, &dir);
    let mut local = tasks_named(&["shared"]);
    // Marker after both the local save and the remote's last change
    local.last_synced = Some(base + Duration::hours(1));
    engine.store().save(&local).unwrap();

    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::UpToDate);
    assert_eq!(remote.put_count(), 0);
}

#[test]
fn remote_only_change_is_pulled() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let base = Utc::now();

    let remote_data = tasks_named(&["newer remote", "second"]);
    seed_split(&remote, &remote_data, base + Duration::hours(2));

    let mut engine = engine_for(&remote, &dir);
    let mut local = tasks_named(&["older local"]);
    local.last_synced = Some(base + Duration::hours(1));
    engine.store().save(&local).unwrap();

    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Pulled);
    let after = engine.store().load().unwrap();
    assert_eq!(without_marker(after), without_marker(remote_data));
}

#[test]
fn local_only_change_is_pushed() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let base = Utc::now();

    seed_split(&remote, &tasks_named(&["stale remote"]), base - Duration::hours(3));

    let mut engine = engine_for(&remote, &dir);
    let mut local = tasks_named(&["fresh local"]);
    // Marker predates the local save, so the local side counts as changed
    local.last_synced = Some(base - Duration::hours(1));
    engine.store().save(&local).unwrap();

    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Pushed);
    let tasks: serde_json::Value =
        serde_json::from_str(&remote.content("data/tasks.json").unwrap()).unwrap();
    assert_eq!(tasks["tasks"][0]["title"], "fresh local");
}

#[test]
fn both_changed_surfaces_conflict_and_mutates_nothing() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let base = Utc::now();

    let remote_data = tasks_named(&["remote edit"]);
    seed_split(&remote, &remote_data, base + Duration::hours(1));

    let mut engine = engine_for(&remote, &dir);
    let mut local = tasks_named(&["local edit"]);
    local.last_synced = Some(base - Duration::hours(1));
    engine.store().save(&local).unwrap();

    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Conflict);

    let conflict = engine.pending_conflict().expect("conflict snapshot");
    assert_eq!(conflict.local.tasks[0].title, "local edit");
    assert_eq!(conflict.remote.tasks[0].title, "remote edit");
    assert!(conflict.local_modified.is_some());
    assert!(conflict.remote_modified.is_some());

    // Neither side was touched
    assert_eq!(engine.store().load().unwrap(), local);
    assert_eq!(remote.put_count(), 0);
}

// =============================================================================
// Stale revision on the push path (the race window)
// =============================================================================

#[test]
fn stale_revision_during_push_escalates_to_conflict() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let base = Utc::now();

    seed_split(&remote, &tasks_named(&["remote"]), base - Duration::hours(3));
    remote.force_conflict_on("data/tasks.json");

    let mut engine = engine_for(&remote, &dir);
    let mut local = tasks_named(&["local"]);
    local.last_synced = Some(base - Duration::hours(1));
    engine.store().save(&local).unwrap();

    // Push path, but the write is rejected as stale: no unhandled error,
    // a populated conflict instead.
    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Conflict);
    let conflict = engine.pending_conflict().expect("conflict snapshot");
    assert_eq!(conflict.local.tasks[0].title, "local");
    assert_eq!(conflict.remote.tasks[0].title, "remote");

    // The marker must not have advanced past an unpushed document
    assert_eq!(
        engine.store().load().unwrap().last_synced,
        Some(base - Duration::hours(1))
    );
}

// =============================================================================
// Resolution
// =============================================================================

fn engine_in_conflict(remote: &MemoryRemote, dir: &TempDir) -> SyncEngine {
    let base = Utc::now();
    let mut remote_data = tasks_named(&["remote edit"]);
    remote_data.memos.push(Memo::new("remote note"));
    seed_split(remote, &remote_data, base + Duration::hours(1));

    let mut engine = engine_for(remote, dir);
    let mut local = tasks_named(&["local edit", "second local"]);
    local.last_synced = Some(base - Duration::hours(1));
    engine.store().save(&local).unwrap();

    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Conflict);
    engine
}

#[test]
fn resolving_local_makes_remote_equal_local_snapshot() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let mut engine = engine_in_conflict(&remote, &dir);

    let snapshot = engine.pending_conflict().unwrap().clone();
    assert_eq!(
        engine.resolve_conflict(Resolution::Local).unwrap(),
        SyncOutcome::Pushed
    );
    assert!(engine.pending_conflict().is_none());

    let (remote_now, _) = layout::load_auto_detect(&remote, &paths())
        .unwrap()
        .expect("remote still has data");
    assert_eq!(remote_now, snapshot.local);

    // Next sync agrees everything is settled
    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::UpToDate);
}

#[test]
fn resolving_remote_makes_local_equal_remote_snapshot() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let mut engine = engine_in_conflict(&remote, &dir);

    let snapshot = engine.pending_conflict().unwrap().clone();
    assert_eq!(
        engine.resolve_conflict(Resolution::Remote).unwrap(),
        SyncOutcome::Pulled
    );

    let local = engine.store().load().unwrap();
    assert_eq!(without_marker(local), without_marker(snapshot.remote));
    assert!(engine.pending_conflict().is_none());
}

#[test]
fn cancel_leaves_both_sides_untouched_and_conflict_reappears() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let mut engine = engine_in_conflict(&remote, &dir);

    let local_before = engine.store().load().unwrap();
    let puts_before = remote.put_count();

    assert_eq!(
        engine.resolve_conflict(Resolution::Cancel).unwrap(),
        SyncOutcome::Conflict
    );
    assert!(engine.pending_conflict().is_none());
    assert_eq!(engine.store().load().unwrap(), local_before);
    assert_eq!(remote.put_count(), puts_before);

    // Nothing was resolved, so the next cycle re-detects it
    assert_eq!(engine.sync_bidirectional().unwrap(), SyncOutcome::Conflict);
}

#[test]
fn resolve_without_pending_conflict_is_an_error() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let mut engine = engine_for(&remote, &dir);

    match engine.resolve_conflict(Resolution::Local) {
        Err(SyncError::NoConflict) => {}
        other => panic!("expected NoConflict, got {:?}", other.map(|o| o.to_string())),
    }
}
