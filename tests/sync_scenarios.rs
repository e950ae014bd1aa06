//! End-to-end offline → online scenarios against the in-memory remote.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use offline_sync::mapper::schema::millis_to_rfc3339;
use offline_sync::mapper::{EntitySchema, Naming, SchemaRegistry};
use offline_sync::model::{QueueStatus, RecordSyncStatus, SyncIndicator, SyncIssueKind};
use offline_sync::offline::OfflineManager;
use offline_sync::storage::{LocalStore, QueueFilter};
use offline_sync::sync::{MemoryRemote, RemoteError, SyncEngine, SyncOptions, SUPERSEDED};
use serde_json::{json, Map, Value};

type Engine = SyncEngine<Arc<MemoryRemote>>;

fn registry() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::new()
            .with(EntitySchema::new("notes", "notes"))
            .unwrap()
            .with(EntitySchema::new("journal", "journal").exclude("draft"))
            .unwrap()
            .with(
                EntitySchema::new("tours", "travel_tours")
                    .with_naming(Naming::CamelToSnake)
                    .map_timestamp("createdAt", "created_at"),
            )
            .unwrap(),
    )
}

fn options() -> SyncOptions {
    SyncOptions {
        retry_backoff: Duration::ZERO,
        ..SyncOptions::default()
    }
}

fn setup() -> (OfflineManager, Engine, Arc<MemoryRemote>) {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, engine) = device(&remote);
    (manager, engine, remote)
}

/// A client with its own local store, talking to `remote`.
fn device(remote: &Arc<MemoryRemote>) -> (OfflineManager, Engine) {
    let manager = OfflineManager::in_memory(registry()).unwrap();
    let engine = SyncEngine::new(
        manager.store().clone(),
        manager.registry().clone(),
        remote.clone(),
        options(),
    );
    (manager, engine)
}

fn data(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn queue(engine: &Engine) -> Vec<offline_sync::model::SyncQueueItem> {
    engine
        .store()
        .with(|s| s.list_queue(&QueueFilter::all()))
        .unwrap()
}

#[tokio::test]
async fn offline_writes_drain_once_online() {
    let (manager, engine, remote) = setup();
    remote.set_offline(true);

    for title in ["Kyoto", "Osaka", "Nara"] {
        manager.create("notes", data(json!({ "title": title }))).unwrap();
    }

    let report = engine.sync_now().await.unwrap();
    assert!(report.interrupted);
    let status = engine.status().unwrap();
    assert_eq!(status.pending_count, 3);
    assert_eq!(status.indicator(false), SyncIndicator::Offline);
    assert_eq!(status.indicator(true), SyncIndicator::Pending);
    assert!(queue(&engine).iter().all(|i| i.retry_count == 0));

    remote.set_offline(false);
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.completed, 3);

    let status = engine.status().unwrap();
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.completed_count, 3);
    assert_eq!(status.indicator(true), SyncIndicator::Synced);
    assert_eq!(remote.rows("notes").len(), 3);
}

#[tokio::test]
async fn item_succeeds_after_two_failures() {
    let (manager, engine, remote) = setup();
    let note = manager.create("notes", data(json!({"title": "retry"}))).unwrap();
    remote.fail_next(
        2,
        RemoteError::Rejected {
            status: 503,
            message: "busy".into(),
        },
    );

    let first = engine.sync_now().await.unwrap();
    assert_eq!(first.retried, 1);
    let second = engine.sync_now().await.unwrap();
    assert_eq!(second.retried, 1);
    let third = engine.sync_now().await.unwrap();
    assert_eq!(third.completed, 1);

    let items = queue(&engine);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, QueueStatus::Completed);
    assert_eq!(items[0].retry_count, 2);
    assert!(remote.row("notes", &note.id).is_some());
}

#[tokio::test]
async fn item_fails_after_max_retries_and_can_be_requeued() {
    let (manager, engine, remote) = setup();
    let note = manager.create("notes", Map::new()).unwrap();
    remote.fail_next(3, RemoteError::Timeout("10s".into()));

    for _ in 0..3 {
        engine.sync_now().await.unwrap();
    }

    let status = engine.status().unwrap();
    assert_eq!(status.failed_count, 1);
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.indicator(true), SyncIndicator::Error);
    assert_eq!(status.errors.len(), 1);
    assert_eq!(status.errors[0].kind, SyncIssueKind::Failed);
    assert_eq!(status.errors[0].entity_id, note.id);

    // Terminal: further passes leave it alone.
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.pushed, 0);

    assert_eq!(engine.retry_failed().await.unwrap(), 1);
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(engine.status().unwrap().failed_count, 0);
}

#[tokio::test]
async fn manual_sync_joins_in_flight_pass() {
    let (manager, engine, remote) = setup();
    manager.create("notes", Map::new()).unwrap();
    remote.set_latency(Duration::from_millis(50));

    let engine = Arc::new(engine);
    let background = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_now().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(engine.is_syncing());

    let joined = engine.sync_now().await.unwrap();
    let first = background.await.unwrap().unwrap();

    assert_eq!(joined, first);
    assert_eq!(remote.writes().len(), 1);
}

#[tokio::test]
async fn per_record_order_is_kept_across_failures() {
    let (manager, engine, remote) = setup();
    let a = manager.create("notes", data(json!({"v": 1}))).unwrap();
    manager.update("notes", &a.id, &data(json!({"v": 2}))).unwrap();
    let b = manager.create("notes", data(json!({"v": 1}))).unwrap();

    remote.fail_next(
        1,
        RemoteError::Rejected {
            status: 500,
            message: "boom".into(),
        },
    );
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.deferred, 1);

    engine.sync_now().await.unwrap();

    let order: Vec<(String, Option<String>)> = remote
        .writes()
        .into_iter()
        .map(|c| (c.method.to_string(), c.id))
        .collect();
    assert_eq!(
        order,
        vec![
            ("create".to_string(), Some(a.id.clone())),
            ("create".to_string(), Some(b.id.clone())),
            ("create".to_string(), Some(a.id.clone())),
            ("update".to_string(), Some(a.id.clone())),
        ]
    );
    assert_eq!(remote.row("notes", &a.id).unwrap()["v"], 2);
}

#[tokio::test]
async fn newer_remote_copy_wins_conflict() {
    let (manager, engine, remote) = setup();
    let note = manager.create("notes", data(json!({"title": "v1"}))).unwrap();
    engine.sync_now().await.unwrap();

    manager
        .update("notes", &note.id, &data(json!({"title": "local"})))
        .unwrap();

    let remote_at = note.updated_at + 60_000;
    remote.insert_remote(
        "notes",
        data(json!({
            "id": note.id,
            "title": "remote",
            "updated_at": millis_to_rfc3339(remote_at),
        })),
    );
    remote.fail_next(
        1,
        RemoteError::Rejected {
            status: 503,
            message: "busy".into(),
        },
    );

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.conflicts, 1);

    let stored = manager.get_stored("notes", &note.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, RecordSyncStatus::Synced);
    assert_eq!(stored.record.fields["title"], "remote");
    assert_eq!(stored.record.updated_at, remote_at);

    let superseded = queue(&engine)
        .into_iter()
        .find(|i| i.operation == offline_sync::model::Operation::Update)
        .unwrap();
    assert_eq!(superseded.status, QueueStatus::Completed);
    assert_eq!(superseded.last_error.as_deref(), Some(SUPERSEDED));

    let status = engine.status().unwrap();
    assert!(status
        .errors
        .iter()
        .any(|e| e.kind == SyncIssueKind::Conflict && e.entity_id == note.id));
}

#[tokio::test]
async fn newer_local_copy_wins_and_is_pushed() {
    let (manager, engine, remote) = setup();
    let note = manager.create("notes", data(json!({"title": "v1"}))).unwrap();
    engine.sync_now().await.unwrap();

    std::thread::sleep(Duration::from_millis(10));
    let local = manager
        .update("notes", &note.id, &data(json!({"title": "local"})))
        .unwrap();

    // Another client wrote in between, but earlier than our edit.
    remote.insert_remote(
        "notes",
        data(json!({
            "id": note.id,
            "title": "remote",
            "updated_at": millis_to_rfc3339(note.updated_at + 1),
        })),
    );
    remote.fail_next(
        1,
        RemoteError::Rejected {
            status: 503,
            message: "busy".into(),
        },
    );

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.conflicts, 1);
    let stored = manager.get_stored("notes", &note.id).unwrap().unwrap();
    assert_eq!(stored.record, local);
    assert!(stored.is_pending());

    engine.sync_now().await.unwrap();
    assert_eq!(remote.row("notes", &note.id).unwrap()["title"], "local");
    assert!(!manager.get_stored("notes", &note.id).unwrap().unwrap().is_pending());
}

#[tokio::test]
async fn pull_applies_remote_inserts_and_deletes() {
    let (manager, engine, remote) = setup();
    let kept = manager.create("tours", data(json!({"cityName": "Kyoto"}))).unwrap();
    engine.sync_now().await.unwrap();
    assert_eq!(remote.row("travel_tours", &kept.id).unwrap()["city_name"], "Kyoto");

    let now = chrono::Utc::now();
    remote.insert_remote(
        "travel_tours",
        data(json!({
            "id": "remote-1",
            "city_name": "Sapporo",
            "created_at": null,
            "updated_at": millis_to_rfc3339(now.timestamp_millis() + 1_000),
        })),
    );
    remote.remove_remote("travel_tours", &kept.id, now + chrono::Duration::seconds(2));

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.pulled, 2);

    let pulled = manager.get("tours", "remote-1").unwrap().unwrap();
    assert_eq!(pulled.fields["cityName"], "Sapporo");
    assert!(manager.get("tours", &kept.id).unwrap().is_none());
    assert_eq!(engine.status().unwrap().pending_count, 0);
}

#[tokio::test]
async fn local_delete_reaches_remote_and_clears_tombstone() {
    let (manager, engine, remote) = setup();
    let note = manager.create("notes", Map::new()).unwrap();
    engine.sync_now().await.unwrap();

    assert!(manager.delete("notes", &note.id).unwrap());
    assert!(manager.get("notes", &note.id).unwrap().is_none());
    assert!(manager.get_stored("notes", &note.id).unwrap().unwrap().deleted);

    engine.sync_now().await.unwrap();
    assert!(remote.row("notes", &note.id).is_none());
    assert!(manager.get_stored("notes", &note.id).unwrap().is_none());
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    let id = {
        let manager = OfflineManager::open(&path, registry()).unwrap();
        assert!(!manager.is_degraded());
        manager.create("notes", data(json!({"title": "persist"}))).unwrap().id
    };

    let manager = OfflineManager::open(&path, registry()).unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let engine = SyncEngine::new(
        manager.store().clone(),
        manager.registry().clone(),
        remote.clone(),
        options(),
    );
    assert_eq!(engine.status().unwrap().pending_count, 1);

    engine.sync_now().await.unwrap();
    assert_eq!(remote.row("notes", &id).unwrap()["title"], "persist");
}

#[tokio::test]
async fn unusable_database_degrades_to_memory() {
    let manager = OfflineManager::open(
        Path::new("/nonexistent-offline-sync-dir/nested/offline.db"),
        registry(),
    )
    .unwrap();
    assert!(manager.is_degraded());

    let note = manager.create("notes", Map::new()).unwrap();
    assert!(manager.get("notes", &note.id).unwrap().is_some());

    let remote = Arc::new(MemoryRemote::new());
    let engine = SyncEngine::new(
        manager.store().clone(),
        manager.registry().clone(),
        remote.clone(),
        options(),
    );
    assert!(engine.status().unwrap().degraded);
    engine.sync_now().await.unwrap();
    assert!(remote.row("notes", &note.id).is_some());
}

#[tokio::test]
async fn local_only_fields_survive_sync() {
    let (manager, engine, remote) = setup();
    let entry = manager
        .create("journal", data(json!({"body": "hi", "draft": "wip"})))
        .unwrap();

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.completed, 1);
    let row = remote.row("journal", &entry.id).unwrap();
    assert!(!row.contains_key("draft"));

    let synced = manager.get("journal", &entry.id).unwrap().unwrap();
    assert_eq!(synced.fields["draft"], "wip");

    // Edited by another client: the pulled copy replaces shared fields only.
    remote.insert_remote(
        "journal",
        data(json!({
            "id": entry.id,
            "body": "edited elsewhere",
            "updated_at": millis_to_rfc3339(entry.updated_at + 60_000),
        })),
    );
    engine.sync_now().await.unwrap();

    let pulled = manager.get("journal", &entry.id).unwrap().unwrap();
    assert_eq!(pulled.fields["body"], "edited elsewhere");
    assert_eq!(pulled.fields["draft"], "wip");
    assert!(!manager.get_stored("journal", &entry.id).unwrap().unwrap().is_pending());
}

#[tokio::test]
async fn late_push_from_offline_device_reaches_other_devices() {
    let remote = Arc::new(MemoryRemote::new());
    let (device_a, engine_a) = device(&remote);
    let (device_b, engine_b) = device(&remote);

    // A writes first but stays offline; B writes later and syncs right away.
    let early = device_a.create("notes", data(json!({"title": "from a"}))).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let later = device_b.create("notes", data(json!({"title": "from b"}))).unwrap();
    assert!(later.updated_at > early.updated_at);
    engine_b.sync_now().await.unwrap();

    engine_a.sync_now().await.unwrap();
    assert!(device_a.get("notes", &later.id).unwrap().is_some());

    let report = engine_b.sync_now().await.unwrap();
    assert_eq!(report.pulled, 1);
    let seen = device_b.get("notes", &early.id).unwrap().unwrap();
    assert_eq!(seen.fields["title"], "from a");
}

#[tokio::test]
async fn redelivered_create_is_completed_without_rewriting_remote() {
    let (manager, engine, remote) = setup();
    let note = manager.create("notes", data(json!({"title": "once"}))).unwrap();
    engine.sync_now().await.unwrap();
    let before = remote.row("notes", &note.id).unwrap();

    // Crash after the remote applied the create but before the ack was stored.
    engine
        .store()
        .with(|s| {
            let mut item = s.list_queue(&QueueFilter::all())?.remove(0);
            item.status = QueueStatus::Pending;
            s.put_queue_item(item)
        })
        .unwrap();

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.retried + report.failed, 0);

    let items = queue(&engine);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, QueueStatus::Completed);
    assert_eq!(items[0].retry_count, 0);
    assert_eq!(remote.row("notes", &note.id).unwrap(), before);
    let creates = remote.writes().into_iter().filter(|c| c.method == "create").count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn delete_of_row_already_deleted_remotely_completes() {
    let (manager, engine, remote) = setup();
    let note = manager.create("notes", Map::new()).unwrap();
    engine.sync_now().await.unwrap();

    remote.remove_remote("notes", &note.id, chrono::Utc::now());
    assert!(manager.delete("notes", &note.id).unwrap());

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.retried + report.failed, 0);

    let delete = queue(&engine)
        .into_iter()
        .find(|i| i.operation == offline_sync::model::Operation::Delete)
        .unwrap();
    assert_eq!(delete.status, QueueStatus::Completed);
    assert!(manager.get_stored("notes", &note.id).unwrap().is_none());
    assert_eq!(engine.status().unwrap().failed_count, 0);
}

#[tokio::test]
async fn update_of_missing_row_recreates_it() {
    let (manager, engine, remote) = setup();
    let note = manager.create("notes", data(json!({"title": "v1"}))).unwrap();
    engine.sync_now().await.unwrap();

    remote.remove_remote("notes", &note.id, chrono::Utc::now());
    manager
        .update("notes", &note.id, &data(json!({"title": "revived"})))
        .unwrap();

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.completed, 1);

    assert_eq!(remote.row("notes", &note.id).unwrap()["title"], "revived");
    let last_two: Vec<&str> = remote
        .writes()
        .iter()
        .rev()
        .take(2)
        .map(|c| c.method)
        .collect();
    assert_eq!(last_two, ["create", "update"]);

    let stored = manager.get_stored("notes", &note.id).unwrap().unwrap();
    assert!(!stored.is_pending());
    assert_eq!(stored.record.fields["title"], "revived");
    assert!(queue(&engine).iter().all(|i| i.status == QueueStatus::Completed));
}
