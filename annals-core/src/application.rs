//! Application facade.
//!
//! An [`Application`] binds a recorder and a mapper into the write and read
//! paths of one aggregate kind: `save` collects pending events and appends
//! them as one atomic batch, the [`Repository`] reconstitutes aggregates, and
//! the [`NotificationLog`] exposes everything that was recorded for
//! downstream propagation.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    domain::Aggregate,
    mapper::Mapper,
    notification::{NotificationLog, NotificationLogReader},
    recorder::Recorder,
    repository::{Repository, RepositoryError},
    store::{EventStore, StoreError},
    transcoder::{JsonTranscoder, Transcoder},
};

/// Facade over store, repository, and notification log for one aggregate
/// kind.
pub struct Application<A: Aggregate, R, T = JsonTranscoder> {
    store: EventStore<A::Payload, R, T>,
    repository: Repository<A, R, T>,
    log: NotificationLog<R>,
    reader: NotificationLogReader<R>,
    snapshotting: bool,
}

impl<A, R, T> Application<A, R, T>
where
    A: Aggregate,
    R: Recorder + 'static,
    T: Transcoder,
{
    /// Bind a recorder and mapper. Snapshotting starts disabled.
    #[must_use]
    pub fn new(recorder: R, mapper: Mapper<T>) -> Self {
        let recorder = Arc::new(recorder);
        let store = EventStore::new(Arc::clone(&recorder), mapper);
        Self {
            repository: Repository::new(store.clone()),
            log: NotificationLog::new(Arc::clone(&recorder)),
            reader: NotificationLogReader::new(recorder),
            store,
            snapshotting: false,
        }
    }

    /// Enable the snapshot path: `get` replays from snapshots and
    /// [`take_snapshot`](Self::take_snapshot) becomes available.
    #[must_use]
    pub fn with_snapshotting(mut self) -> Self {
        self.repository = self.repository.with_snapshots();
        self.snapshotting = true;
        self
    }

    /// Collect pending events from the given aggregates and append them as
    /// one atomic batch.
    ///
    /// Returns the contiguous notification ids assigned to the batch. On a
    /// conflict the pending buffers are *not* restored: the aggregate
    /// instances are stale and must be discarded, reloaded, and the commands
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] whose
    /// [`is_conflict`](StoreError::is_conflict) distinguishes the
    /// optimistic-concurrency loss from mapping and persistence failures.
    #[tracing::instrument(skip(self, aggregates))]
    pub async fn save<'a>(
        &self,
        aggregates: impl IntoIterator<Item = &'a mut A>,
    ) -> Result<Vec<u64>, StoreError>
    where
        A: 'a,
    {
        let mut events = Vec::new();
        for aggregate in aggregates {
            events.extend(aggregate.collect_pending());
        }
        self.store.put(&events).await
    }

    /// Reconstitute the aggregate at its latest version.
    ///
    /// # Errors
    ///
    /// See [`Repository::get`].
    pub async fn get(&self, id: uuid::Uuid) -> Result<A, RepositoryError>
    where
        A: DeserializeOwned,
    {
        self.repository.get(id, None).await
    }

    /// Reconstitute the aggregate at `at` (or latest) and record a snapshot
    /// of it. Returns the snapshotted version.
    ///
    /// Snapshots are only consulted on reads when snapshotting is enabled;
    /// see [`with_snapshotting`](Self::with_snapshotting).
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if reconstitution or recording fails.
    pub async fn take_snapshot(
        &self,
        id: uuid::Uuid,
        at: Option<u64>,
    ) -> Result<u64, RepositoryError>
    where
        A: Serialize + DeserializeOwned,
    {
        let aggregate = self.repository.get(id, at).await?;
        self.repository.record_snapshot(&aggregate).await?;
        Ok(aggregate.version())
    }

    /// The aggregate repository.
    #[must_use]
    pub const fn repository(&self) -> &Repository<A, R, T> {
        &self.repository
    }

    /// The cross-aggregate notification log.
    #[must_use]
    pub const fn log(&self) -> &NotificationLog<R> {
        &self.log
    }

    /// A reader over the notification log.
    #[must_use]
    pub const fn reader(&self) -> &NotificationLogReader<R> {
        &self.reader
    }

    /// The underlying event store.
    #[must_use]
    pub const fn store(&self) -> &EventStore<A::Payload, R, T> {
        &self.store
    }

    /// Whether the snapshot path is enabled.
    #[must_use]
    pub const fn is_snapshotting_enabled(&self) -> bool {
        self.snapshotting
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt as _;

    use super::*;
    use crate::{domain::tests::World, recorder::inmemory::InMemoryRecorder};

    fn app() -> Application<World, InMemoryRecorder> {
        Application::new(InMemoryRecorder::new(), Mapper::default())
    }

    fn populated_world() -> World {
        let mut world = World::register("Earth");
        world.make_it_so("dinosaurs");
        world.make_it_so("trucks");
        world.make_it_so("internet");
        world
    }

    #[tokio::test]
    async fn save_assigns_contiguous_notification_ids() {
        let app = app();
        let mut world = populated_world();

        let ids = app.save([&mut world]).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(!world.root().has_pending());

        let loaded = app.get(world.id()).await.unwrap();
        assert_eq!(loaded, world);
        assert_eq!(loaded.version(), 4);
    }

    #[tokio::test]
    async fn save_of_multiple_aggregates_is_one_batch()  {
        let app = app();
        let mut earth = populated_world();
        let mut mars = World::register("Mars");
        mars.make_it_so("olympus mons");

        let ids = app.save([&mut earth, &mut mars]).await.unwrap();
        assert_eq!(ids, (1..=6).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn save_with_nothing_pending_is_a_no_op() {
        let app = app();
        let mut world = populated_world();
        app.save([&mut world]).await.unwrap();

        let ids = app.save([&mut world]).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(app.log().max_notification_id().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn conflicting_save_surfaces_and_leaves_the_log_intact() {
        let app = app();
        let mut world = populated_world();
        app.save([&mut world]).await.unwrap();

        // Two sessions load version 4 and both issue an event.
        let mut winner = app.get(world.id()).await.unwrap();
        let mut loser = app.get(world.id()).await.unwrap();
        winner.make_it_so("fusion power");
        loser.make_it_so("jet packs");

        app.save([&mut winner]).await.unwrap();
        let err = app.save([&mut loser]).await.unwrap_err();
        assert!(err.is_conflict());

        // The losing batch left no trace.
        let section = app.log().section("1,10").await.unwrap();
        assert_eq!(section.items.len(), 5);

        // The loser reloads and retries.
        let mut retry = app.get(world.id()).await.unwrap();
        assert_eq!(retry.version(), 5);
        retry.make_it_so("jet packs");
        app.save([&mut retry]).await.unwrap();
        assert_eq!(app.get(world.id()).await.unwrap().version(), 6);
    }

    #[tokio::test]
    async fn take_snapshot_then_get_replays_the_tail() {
        let app = app().with_snapshotting();
        let mut world = populated_world();
        app.save([&mut world]).await.unwrap();

        let version = app.take_snapshot(world.id(), Some(2)).await.unwrap();
        assert_eq!(version, 2);

        let loaded = app.get(world.id()).await.unwrap();
        assert_eq!(loaded, world);

        let at_two = app.repository().get(world.id(), Some(2)).await.unwrap();
        assert_eq!(at_two.history, vec!["dinosaurs"]);
    }

    #[tokio::test]
    async fn reader_resumes_mid_log() {
        let app = app();
        let mut earth = populated_world();
        let mut mars = World::register("Mars");
        app.save([&mut earth, &mut mars]).await.unwrap();

        let ids: Vec<u64> = app
            .reader()
            .read(3)
            .map(|n| n.unwrap().id)
            .collect()
            .await;
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn notifications_share_the_originator() {
        let app = app();
        let mut world = populated_world();
        app.save([&mut world]).await.unwrap();

        let section = app.log().section("1,10").await.unwrap();
        assert!(
            section
                .items
                .iter()
                .all(|n| n.event.originator_id == world.id())
        );
    }
}
