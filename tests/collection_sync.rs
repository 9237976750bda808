//! Integration tests for synchronized collections.

use santiye_sync::{
    ChangeEvent, InsertPolicy, MemoryBackend, Record, RecordId, SyncConfig, SyncedCollection,
    UpdateReason,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn test_backend() -> Arc<MemoryBackend> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Arc::new(MemoryBackend::new())
}

fn site(id: &str, created_at: &str) -> Record {
    Record::with_id(id)
        .with("name", format!("Şantiye {}", id))
        .with("created_at", created_at)
}

fn ids(collection: &SyncedCollection) -> Vec<String> {
    collection
        .snapshot()
        .ids()
        .into_iter()
        .map(|id| id.0)
        .collect()
}

fn wait_for(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Backend with A (older) and B (newer) seeded into "sites".
fn seeded_sites() -> Arc<MemoryBackend> {
    let backend = test_backend();
    backend.seed(
        "sites",
        [
            site("A", "2024-01-10T08:00:00Z"),
            site("B", "2024-02-20T08:00:00Z"),
        ],
    );
    backend
}

fn open_sites(backend: &Arc<MemoryBackend>) -> SyncedCollection {
    SyncedCollection::open(backend.clone(), "sites", Vec::new(), SyncConfig::default())
}

// --- Initial Load ---

#[test]
fn test_load_newest_first() {
    let backend = seeded_sites();
    backend.pause_fetches();

    let sites = open_sites(&backend);
    assert!(sites.loading());
    assert!(sites.data().is_empty());

    backend.resume_fetches();
    assert!(sites.wait_loaded(WAIT));

    assert_eq!(ids(&sites), vec!["B", "A"]);
    assert!(!sites.loading());
}

#[test]
fn test_initial_value_shown_until_snapshot() {
    let backend = seeded_sites();
    backend.pause_fetches();

    let placeholder = vec![site("cached", "2023-12-01T00:00:00Z")];
    let sites = SyncedCollection::open(
        backend.clone(),
        "sites",
        placeholder.clone(),
        SyncConfig::default(),
    );
    assert_eq!(sites.data(), placeholder);

    backend.resume_fetches();
    assert!(sites.wait_loaded(WAIT));
    assert_eq!(ids(&sites), vec!["B", "A"]);
}

#[test]
fn test_unknown_resource_is_empty_and_silent() {
    let backend = seeded_sites();
    let missing = SyncedCollection::open(
        backend.clone(),
        "no_such_table",
        Vec::new(),
        SyncConfig::default(),
    );
    assert!(missing.wait_loaded(WAIT));
    assert!(missing.data().is_empty());

    backend.insert("sites", site("C", "2024-03-01T00:00:00Z"));
    thread::sleep(Duration::from_millis(50));
    assert!(missing.data().is_empty());
    assert_eq!(missing.version(), 1);
}

// --- Live Changes ---

#[test]
fn test_update_replaces_in_place() {
    let backend = seeded_sites();
    let sites = open_sites(&backend);
    assert!(sites.wait_loaded(WAIT));

    let updated = site("A", "2024-01-10T08:00:00Z").with("progress", 80);
    assert_eq!(backend.update("sites", updated).unwrap(), Some(1));

    assert!(sites.wait_until(WAIT, |s| {
        s.find(&RecordId::from("A"))
            .and_then(|r| r.get("progress"))
            == Some(&json!(80))
    }));
    assert_eq!(ids(&sites), vec!["B", "A"]);
    assert_eq!(sites.data()[0], site("B", "2024-02-20T08:00:00Z"));
}

#[test]
fn test_delete_removes() {
    let backend = seeded_sites();
    let sites = open_sites(&backend);
    assert!(sites.wait_loaded(WAIT));

    backend.delete("sites", &RecordId::from("B"));
    assert!(sites.wait_until(WAIT, |s| s.len() == 1));
    assert_eq!(ids(&sites), vec!["A"]);
}

#[test]
fn test_insert_prepends_regardless_of_created_at() {
    let backend = seeded_sites();
    let sites = open_sites(&backend);
    assert!(sites.wait_loaded(WAIT));

    // Older than everything loaded, still becomes the head.
    backend.insert("sites", site("Old", "2020-01-01T00:00:00Z"));
    assert!(sites.wait_until(WAIT, |s| s.len() == 3));
    assert_eq!(ids(&sites), vec!["Old", "B", "A"]);
}

#[test]
fn test_repeated_insert_duplicates() {
    let backend = test_backend();
    let sites = open_sites(&backend);
    assert!(sites.wait_loaded(WAIT));

    let event = ChangeEvent::insert(site("A", "2024-01-01T00:00:00Z"));
    backend.emit("sites", event.clone());
    backend.emit("sites", event);

    assert!(sites.wait_until(WAIT, |s| s.len() == 2));
    assert_eq!(ids(&sites), vec!["A", "A"]);
}

#[test]
fn test_watch_sees_every_event() {
    let backend = seeded_sites();
    let sites = open_sites(&backend);
    assert!(sites.wait_loaded(WAIT));
    let updates = sites.watch();

    backend.insert("sites", site("C", "2024-03-01T00:00:00Z"));
    backend.delete("sites", &RecordId::from("A"));

    let first = updates.recv_timeout(WAIT).unwrap();
    let second = updates.recv_timeout(WAIT).unwrap();
    assert!(matches!(first.reason, UpdateReason::Event { .. }));
    assert!(matches!(second.reason, UpdateReason::Event { .. }));
    assert_eq!(second.version, first.version + 1);
    assert_eq!(ids(&sites), vec!["C", "B"]);
}

#[test]
fn test_set_data_then_events_apply_on_top() {
    let backend = seeded_sites();
    let sites = open_sites(&backend);
    assert!(sites.wait_loaded(WAIT));

    sites.update_data(|records| records.retain(|r| r.id() == Some(RecordId::from("A"))));
    assert_eq!(ids(&sites), vec!["A"]);

    backend.insert("sites", site("C", "2024-03-01T00:00:00Z"));
    assert!(sites.wait_until(WAIT, |s| s.len() == 2));
    assert_eq!(ids(&sites), vec!["C", "A"]);
}

// --- Fetch / Subscribe Race ---

#[test]
fn test_events_during_fetch_replay_after_snapshot() {
    let backend = seeded_sites();
    backend.pause_fetches();

    let sites = open_sites(&backend);
    // Subscription is open before the fetch resolves.
    assert_eq!(backend.active_subscriptions_for("sites"), 1);

    backend.emit("sites", ChangeEvent::insert(site("Live", "2024-05-01T00:00:00Z")));
    backend.emit(
        "sites",
        ChangeEvent::update(site("A", "2024-01-10T08:00:00Z").with("progress", 55)),
    );

    backend.resume_fetches();
    assert!(sites.wait_until(WAIT, |s| {
        !s.loading
            && s.find(&RecordId::from("A"))
                .and_then(|r| r.get("progress"))
                == Some(&json!(55))
    }));

    assert_eq!(ids(&sites), vec!["Live", "B", "A"]);
}

#[test]
fn test_row_in_snapshot_and_queued_insert_appears_twice() {
    let backend = seeded_sites();
    backend.pause_fetches();
    let sites = open_sites(&backend);

    // Written to the table and broadcast while the fetch is pending.
    backend.insert("sites", site("C", "2024-03-01T00:00:00Z"));

    backend.resume_fetches();
    assert!(sites.wait_until(WAIT, |s| s.len() == 4));
    assert_eq!(ids(&sites), vec!["C", "C", "B", "A"]);
}

#[test]
fn test_upsert_policy_collapses_race_duplicates() {
    let backend = seeded_sites();
    backend.pause_fetches();
    let sites = SyncedCollection::open(
        backend.clone(),
        "sites",
        Vec::new(),
        SyncConfig {
            insert_policy: InsertPolicy::Upsert,
            ..Default::default()
        },
    );

    backend.insert("sites", site("C", "2024-03-01T00:00:00Z"));
    let updates = sites.watch();
    backend.resume_fetches();

    // Snapshot, then the replayed insert overwriting C in place.
    updates.recv_timeout(WAIT).unwrap();
    let replay = updates.recv_timeout(WAIT).unwrap();
    assert!(matches!(replay.reason, UpdateReason::Event { .. }));
    assert_eq!(ids(&sites), vec!["C", "B", "A"]);
}

// --- Lifecycle ---

#[test]
fn test_teardown_while_fetch_pending() {
    let backend = seeded_sites();
    backend.pause_fetches();

    let placeholder = vec![site("cached", "2023-12-01T00:00:00Z")];
    let mut sites = SyncedCollection::open(
        backend.clone(),
        "sites",
        placeholder.clone(),
        SyncConfig::default(),
    );
    let updates = sites.watch();
    wait_for(|| backend.fetch_count() == 1);

    sites.close();
    assert_eq!(backend.active_subscriptions(), 0);

    backend.resume_fetches();
    wait_for(|| backend.fetches_finished() == 1);
    thread::sleep(Duration::from_millis(50));

    assert_eq!(sites.data(), placeholder);
    assert!(sites.loading());
    assert_eq!(sites.version(), 0);
    assert!(updates.try_recv().is_err());
}

#[test]
fn test_resource_change_releases_previous_subscription() {
    let backend = seeded_sites();
    backend.seed("personnel", [Record::with_id("P1").with("created_at", "2024-01-01")]);

    let mut view = open_sites(&backend);
    assert!(view.wait_loaded(WAIT));
    let first = view.subscription_id().unwrap();

    view.set_resource("personnel");
    assert_eq!(backend.active_subscriptions_for("sites"), 0);
    assert_eq!(backend.active_subscriptions_for("personnel"), 1);
    assert_ne!(view.subscription_id().unwrap(), first);

    assert!(view.wait_until(WAIT, |s| !s.loading && s.resource == "personnel"));
    assert_eq!(ids(&view), vec!["P1"]);

    // Old resource no longer reaches this collection.
    backend.insert("sites", site("C", "2024-03-01T00:00:00Z"));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ids(&view), vec!["P1"]);

    // Same name is a no-op.
    let subscribes = backend.subscribe_count();
    view.set_resource("personnel");
    assert_eq!(backend.subscribe_count(), subscribes);
    assert_eq!(backend.active_subscriptions(), 1);
}

#[test]
fn test_consumers_are_independent() {
    let backend = seeded_sites();
    let left = open_sites(&backend);
    let right = open_sites(&backend);
    assert!(left.wait_loaded(WAIT));
    assert!(right.wait_loaded(WAIT));
    assert_eq!(backend.active_subscriptions_for("sites"), 2);

    assert_eq!(backend.insert("sites", site("C", "2024-03-01T00:00:00Z")), 2);
    assert!(left.wait_until(WAIT, |s| s.len() == 3));
    assert!(right.wait_until(WAIT, |s| s.len() == 3));

    // Local edits stay local.
    left.set_data(Vec::new());
    assert!(left.data().is_empty());
    assert_eq!(right.data().len(), 3);

    drop(left);
    assert_eq!(backend.active_subscriptions_for("sites"), 1);
}

#[test]
fn test_decode_rows_at_the_boundary() {
    #[derive(serde::Deserialize)]
    struct Site {
        id: String,
        name: String,
    }

    let backend = seeded_sites();
    let sites = open_sites(&backend);
    assert!(sites.wait_loaded(WAIT));

    let typed: Vec<Site> = sites.snapshot().decode_all().unwrap();
    assert_eq!(typed.len(), 2);
    assert_eq!(typed[0].id, "B");
    assert_eq!(typed[0].name, "Şantiye B");
}
