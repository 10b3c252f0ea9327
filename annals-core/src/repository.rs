//! Aggregate reconstitution.
//!
//! The [`Repository`] rebuilds an aggregate from its recorded history:
//! optionally seed from the latest snapshot at or below the target version,
//! then fold the remaining events through the aggregate's `create`/`play`
//! contract. The fold is pure - replaying the same sequence produces an
//! identical aggregate modulo the pending-event buffer.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    domain::{Aggregate, CreationError},
    mapper::MapperError,
    recorder::{EventSelect, ProgrammingError, Recorder, RecorderError},
    store::{EventStore, StoreError},
    transcoder::{JsonTranscoder, Transcoder},
};

/// Error from aggregate reconstitution.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No events and no snapshot for this id, or the requested version
    /// exceeds the recorded history.
    #[error("aggregate {0} not found")]
    AggregateNotFound(Uuid),
    /// The recorded history starts with a non-creation event.
    #[error("stored history is corrupt: {0}")]
    Creation(#[from] CreationError),
    /// Contract violation, e.g. requesting version 0.
    #[error(transparent)]
    Programming(#[from] ProgrammingError),
    /// Loading or mapping failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MapperError> for RepositoryError {
    fn from(err: MapperError) -> Self {
        Self::Store(err.into())
    }
}

impl From<RecorderError> for RepositoryError {
    fn from(err: RecorderError) -> Self {
        Self::Store(err.into())
    }
}

/// Rebuilds aggregates from events and snapshots.
///
/// Cheap to clone; clones share the recorder.
pub struct Repository<A: Aggregate, R, T = JsonTranscoder> {
    events: EventStore<A::Payload, R, T>,
    snapshots_enabled: bool,
}

impl<A: Aggregate, R, T: Clone> Clone for Repository<A, R, T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            snapshots_enabled: self.snapshots_enabled,
        }
    }
}

impl<A, R, T> Repository<A, R, T>
where
    A: Aggregate,
    R: Recorder,
    T: Transcoder,
{
    #[must_use]
    pub fn new(events: EventStore<A::Payload, R, T>) -> Self {
        Self {
            events,
            snapshots_enabled: false,
        }
    }

    /// Consult the snapshot stream before replaying events.
    #[must_use]
    pub const fn with_snapshots(mut self) -> Self {
        self.snapshots_enabled = true;
        self
    }

    /// Reconstitute the aggregate at `at` (or its latest version).
    ///
    /// When snapshotting is enabled, replay starts from the latest snapshot
    /// with `version <= at`; otherwise the full history is folded.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AggregateNotFound`] when nothing is
    /// recorded for `id`, or when `at` exceeds the recorded history.
    /// Requesting version 0 is a programming error.
    #[tracing::instrument(skip(self), fields(aggregate = A::TOPIC))]
    pub async fn get(&self, id: Uuid, at: Option<u64>) -> Result<A, RepositoryError>
    where
        A: DeserializeOwned,
    {
        if at == Some(0) {
            return Err(ProgrammingError::ZeroVersion { originator_id: id }.into());
        }

        let mut aggregate = self.snapshot_base(id, at).await?;

        let mut select = EventSelect::all();
        if let Some(aggregate) = &aggregate {
            select = select.after(aggregate.version());
        }
        if let Some(at) = at {
            select = select.up_to(at);
        }

        for event in self.events.get(id, select).await? {
            match aggregate.as_mut() {
                Some(aggregate) => aggregate.play(&event),
                None => aggregate = Some(A::create(&event)?),
            }
        }

        let aggregate = aggregate.ok_or(RepositoryError::AggregateNotFound(id))?;
        if let Some(at) = at
            && aggregate.version() < at
        {
            tracing::debug!(
                version = aggregate.version(),
                requested = at,
                "requested version exceeds recorded history"
            );
            return Err(RepositoryError::AggregateNotFound(id));
        }
        Ok(aggregate)
    }

    /// Record a snapshot of `aggregate` at its current version.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] if mapping or recording fails.
    pub async fn record_snapshot(&self, aggregate: &A) -> Result<(), RepositoryError>
    where
        A: Serialize,
    {
        let snapshot = self.events.mapper().from_aggregate(aggregate)?;
        self.events.recorder().insert_snapshot(snapshot).await?;
        tracing::debug!(
            originator_id = %aggregate.id(),
            originator_version = aggregate.version(),
            "snapshot recorded"
        );
        Ok(())
    }

    /// Load the snapshot to replay from, if snapshotting is enabled.
    async fn snapshot_base(&self, id: Uuid, at: Option<u64>) -> Result<Option<A>, RepositoryError>
    where
        A: DeserializeOwned,
    {
        if !self.snapshots_enabled {
            return Ok(None);
        }
        let Some(stored) = self.events.recorder().select_snapshot(id, at).await? else {
            return Ok(None);
        };
        let aggregate = self.events.mapper().to_aggregate(&stored)?;
        tracing::trace!(
            originator_version = stored.originator_version,
            "replaying from snapshot"
        );
        Ok(Some(aggregate))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        domain::tests::{World, WorldEvent},
        mapper::Mapper,
        recorder::{StoredEvent, inmemory::InMemoryRecorder},
    };

    struct Fixture {
        store: EventStore<WorldEvent, InMemoryRecorder>,
        world: World,
    }

    async fn fixture() -> Fixture {
        let store = EventStore::new(Arc::new(InMemoryRecorder::new()), Mapper::default());
        let mut world = World::register("Earth");
        world.make_it_so("dinosaurs");
        world.make_it_so("trucks");
        world.make_it_so("internet");
        let events = world.collect_pending();
        store.put(&events).await.unwrap();
        Fixture { store, world }
    }

    #[tokio::test]
    async fn reconstitutes_the_latest_version() {
        let Fixture { store, world } = fixture().await;
        let repository: Repository<World, _> = Repository::new(store);

        let loaded = repository.get(world.id(), None).await.unwrap();
        assert_eq!(loaded, world);
        assert_eq!(loaded.version(), 4);
        assert_eq!(loaded.history, vec!["dinosaurs", "trucks", "internet"]);
    }

    #[tokio::test]
    async fn reconstitutes_at_an_earlier_version() {
        let Fixture { store, world } = fixture().await;
        let repository: Repository<World, _> = Repository::new(store);

        let loaded = repository.get(world.id(), Some(3)).await.unwrap();
        assert_eq!(loaded.version(), 3);
        assert_eq!(loaded.history, vec!["dinosaurs", "trucks"]);
    }

    #[tokio::test]
    async fn unknown_aggregate_is_not_found() {
        let Fixture { store, .. } = fixture().await;
        let repository: Repository<World, _> = Repository::new(store);

        let err = repository.get(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AggregateNotFound(_)));
    }

    #[tokio::test]
    async fn version_beyond_history_is_not_found() {
        let Fixture { store, world } = fixture().await;
        let repository: Repository<World, _> = Repository::new(store);

        let err = repository.get(world.id(), Some(7)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AggregateNotFound(_)));
    }

    #[tokio::test]
    async fn version_zero_is_a_programming_error() {
        let Fixture { store, world } = fixture().await;
        let repository: Repository<World, _> = Repository::new(store);

        let err = repository.get(world.id(), Some(0)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Programming(_)));
    }

    #[tokio::test]
    async fn replays_from_the_latest_snapshot() {
        let Fixture { store, world } = fixture().await;
        let repository = Repository::<World, _>::new(store.clone()).with_snapshots();

        // Snapshot at version 2, then replay only the tail.
        let at_two = repository.get(world.id(), Some(2)).await.unwrap();
        repository.record_snapshot(&at_two).await.unwrap();

        let loaded = repository.get(world.id(), None).await.unwrap();
        assert_eq!(loaded, world);
        assert_eq!(loaded.history, vec!["dinosaurs", "trucks", "internet"]);
    }

    #[tokio::test]
    async fn snapshot_alone_satisfies_a_versioned_get() {
        let Fixture { store, world } = fixture().await;
        let repository = Repository::<World, _>::new(store.clone()).with_snapshots();

        let at_three = repository.get(world.id(), Some(3)).await.unwrap();
        repository.record_snapshot(&at_three).await.unwrap();

        let loaded = repository.get(world.id(), Some(3)).await.unwrap();
        assert_eq!(loaded, at_three);
    }

    #[tokio::test]
    async fn corrupt_first_event_is_a_creation_error() {
        let recorder = Arc::new(InMemoryRecorder::new());
        let store: EventStore<WorldEvent, _> = EventStore::new(Arc::clone(&recorder), Mapper::default());
        let repository: Repository<World, _> = Repository::new(store);

        // A history that starts with a non-creation event.
        let mut rogue = World::register("Earth");
        rogue.make_it_so("dinosaurs");
        let events = rogue.collect_pending();
        let stored: Vec<StoredEvent> = events
            .iter()
            .skip(1)
            .map(|e| {
                let mut record = Mapper::default().from_domain(e).unwrap();
                record.originator_version = 1;
                record
            })
            .collect();
        recorder
            .insert_events(crate::recorder::NonEmpty::from_vec(stored).unwrap())
            .await
            .unwrap();

        let err = repository.get(rogue.id(), None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Creation(_)));
    }
}
