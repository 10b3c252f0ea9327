//! Integration tests for the `PostgreSQL` recorder.
//!
//! These tests require Docker to be running and will spin up a `PostgreSQL`
//! container using testcontainers.

use annals_core::recorder::{EventSelect, NonEmpty, Recorder, RecorderError, StoredEvent};
use annals_postgres::PgRecorder;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

/// Test helper to set up a `PostgreSQL` container and a migrated recorder.
struct TestDb {
    _container: ContainerAsync<Postgres>,
    recorder: PgRecorder,
}

impl TestDb {
    async fn new() -> Self {
        let container = Postgres::default().start().await.unwrap();
        let host = container.get_host().await.unwrap();
        let port = container.get_host_port_ipv4(5432).await.unwrap();

        let connection_string = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let pool = PgPool::connect(&connection_string).await.unwrap();
        let recorder = PgRecorder::new(pool);
        recorder.migrate().await.unwrap();

        Self {
            _container: container,
            recorder,
        }
    }
}

fn stored(id: Uuid, version: u64, state: &[u8]) -> StoredEvent {
    StoredEvent {
        originator_id: id,
        originator_version: version,
        topic: "world:SomethingHappened".to_string(),
        state: state.to_vec(),
    }
}

fn batch(events: Vec<StoredEvent>) -> NonEmpty<StoredEvent> {
    NonEmpty::from_vec(events).expect("nonempty")
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let db = TestDb::new().await;
    db.recorder.migrate().await.unwrap();
}

#[tokio::test]
async fn inserts_assign_dense_increasing_ids() {
    let db = TestDb::new().await;
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let first = db
        .recorder
        .insert_events(batch(vec![stored(a, 1, b"{}"), stored(a, 2, b"{}")]))
        .await
        .unwrap();
    let second = db
        .recorder
        .insert_events(batch(vec![stored(b, 1, b"{}")]))
        .await
        .unwrap();

    assert_eq!(first, vec![1, 2]);
    assert_eq!(second, vec![3]);
    assert_eq!(db.recorder.max_notification_id().await.unwrap(), 3);
}

#[tokio::test]
async fn duplicate_version_conflicts_and_leaves_state_unchanged() {
    let db = TestDb::new().await;
    let id = Uuid::new_v4();
    db.recorder
        .insert_events(batch(vec![stored(id, 1, b"{}")]))
        .await
        .unwrap();

    let err = db
        .recorder
        .insert_events(batch(vec![
            stored(Uuid::new_v4(), 1, b"{}"),
            stored(id, 1, b"{}"),
        ]))
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(db.recorder.max_notification_id().await.unwrap(), 1);
    assert_eq!(
        db.recorder.select_notifications(1, 10).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn concurrent_appends_at_the_same_version_serialize() {
    let db = TestDb::new().await;
    let id = Uuid::new_v4();
    db.recorder
        .insert_events(batch(vec![stored(id, 1, b"{}")]))
        .await
        .unwrap();

    let left = db.recorder.clone();
    let right = db.recorder.clone();
    let (left, right) = tokio::join!(
        tokio::spawn(async move {
            left.insert_events(NonEmpty::singleton(stored(id, 2, b"left")))
                .await
        }),
        tokio::spawn(async move {
            right
                .insert_events(NonEmpty::singleton(stored(id, 2, b"right")))
                .await
        }),
    );
    let (left, right) = (left.unwrap(), right.unwrap());

    assert_eq!(
        u32::from(left.is_ok()) + u32::from(right.is_ok()),
        1,
        "exactly one writer wins"
    );
    assert_eq!(db.recorder.max_notification_id().await.unwrap(), 2);
}

#[tokio::test]
async fn zero_version_is_rejected_before_touching_the_database() {
    let db = TestDb::new().await;
    let err = db
        .recorder
        .insert_events(batch(vec![stored(Uuid::new_v4(), 0, b"{}")]))
        .await
        .unwrap_err();
    assert!(matches!(err, RecorderError::Programming(_)));
}

#[tokio::test]
async fn select_events_honours_range_order_and_limit() {
    let db = TestDb::new().await;
    let id = Uuid::new_v4();
    db.recorder
        .insert_events(batch(
            (1..=5).map(|v| stored(id, v, b"{}")).collect::<Vec<_>>(),
        ))
        .await
        .unwrap();

    let versions = |events: Vec<StoredEvent>| {
        events
            .into_iter()
            .map(|e| e.originator_version)
            .collect::<Vec<_>>()
    };

    let range = db
        .recorder
        .select_events(id, EventSelect::all().after(1).up_to(4))
        .await
        .unwrap();
    assert_eq!(versions(range), vec![2, 3, 4]);

    let newest = db
        .recorder
        .select_events(id, EventSelect::all().descending().limit(2))
        .await
        .unwrap();
    assert_eq!(versions(newest), vec![5, 4]);

    let unknown = db
        .recorder
        .select_events(Uuid::new_v4(), EventSelect::all())
        .await
        .unwrap();
    assert!(unknown.is_empty());
}

#[tokio::test]
async fn select_notifications_pages_from_start() {
    let db = TestDb::new().await;
    let id = Uuid::new_v4();
    db.recorder
        .insert_events(batch(
            (1..=6).map(|v| stored(id, v, b"{}")).collect::<Vec<_>>(),
        ))
        .await
        .unwrap();

    let page = db.recorder.select_notifications(3, 2).await.unwrap();
    let ids: Vec<u64> = page.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![3, 4]);

    let state: Vec<&[u8]> = page.iter().map(|n| n.event.state.as_slice()).collect();
    assert_eq!(state, vec![b"{}", b"{}"]);

    assert!(db.recorder.select_notifications(7, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshots_upsert_and_select_by_version() {
    let db = TestDb::new().await;
    let id = Uuid::new_v4();

    for version in [2u64, 5] {
        db.recorder
            .insert_snapshot(stored(id, version, format!("snap-{version}").as_bytes()))
            .await
            .unwrap();
    }
    db.recorder
        .insert_snapshot(stored(id, 5, b"snap-5-redone"))
        .await
        .unwrap();

    let latest = db.recorder.select_snapshot(id, None).await.unwrap().unwrap();
    assert_eq!(latest.originator_version, 5);
    assert_eq!(latest.state, b"snap-5-redone");

    let at_four = db
        .recorder
        .select_snapshot(id, Some(4))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(at_four.originator_version, 2);

    assert!(db.recorder.select_snapshot(id, Some(1)).await.unwrap().is_none());

    // Snapshots do not produce notifications.
    assert_eq!(db.recorder.max_notification_id().await.unwrap(), 0);
}
