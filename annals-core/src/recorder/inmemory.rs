//! In-memory recorder for tests and examples.
//!
//! This is the reference implementation of the [`Recorder`] contract. A
//! single mutex guards all state, so id assignment happens in the same
//! critical section as commit visibility: notification ids are trivially
//! dense and in commit order (strategy (a) of the concurrency protocol).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use nonempty::NonEmpty;
use uuid::Uuid;

use super::{
    EventSelect, Notification, Recorder, RecorderError, RecordConflict, StoredEvent,
    validate_batch,
};

/// Thread-safe in-memory recorder.
///
/// Cloning is cheap and clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryRecorder {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Per-aggregate event streams, each ordered by version.
    streams: HashMap<Uuid, Vec<StoredEvent>>,
    /// All notifications in commit order; `id == index + 1`.
    notifications: Vec<Notification>,
    /// Per-aggregate snapshots, each ordered by version.
    snapshots: HashMap<Uuid, Vec<StoredEvent>>,
}

impl InMemoryRecorder {
    /// Topic selecting this backend via `INFRASTRUCTURE_FACTORY`.
    pub const TOPIC: &'static str = "annals.recorder:InMemoryRecorder";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for InMemoryRecorder {
    #[tracing::instrument(skip(self, batch), fields(event_count = batch.len()))]
    fn insert_events(
        &self,
        batch: NonEmpty<StoredEvent>,
    ) -> impl Future<Output = Result<Vec<u64>, RecorderError>> + Send {
        let result = (|| {
            validate_batch(&batch)?;

            let mut inner = self.inner.lock().expect("recorder lock poisoned");

            // Conflict check first: either the whole batch lands or none of it.
            for event in batch.iter() {
                let recorded = inner
                    .streams
                    .get(&event.originator_id)
                    .is_some_and(|stream| {
                        stream
                            .iter()
                            .any(|e| e.originator_version == event.originator_version)
                    });
                if recorded {
                    tracing::debug!(
                        originator_id = %event.originator_id,
                        originator_version = event.originator_version,
                        "version collision, rejecting batch"
                    );
                    return Err(RecordConflict {
                        originator_id: event.originator_id,
                        originator_version: event.originator_version,
                    }
                    .into());
                }
            }

            let mut ids = Vec::with_capacity(batch.len());
            for event in batch {
                let id = inner.notifications.len() as u64 + 1;
                ids.push(id);
                inner.notifications.push(Notification {
                    id,
                    event: event.clone(),
                });
                inner
                    .streams
                    .entry(event.originator_id)
                    .or_default()
                    .push(event);
            }
            drop(inner);
            tracing::debug!(notification_ids = ?ids, "batch recorded");
            Ok(ids)
        })();

        std::future::ready(result)
    }

    #[tracing::instrument(skip(self))]
    fn select_events(
        &self,
        originator_id: Uuid,
        select: EventSelect,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, RecorderError>> + Send {
        let inner = self.inner.lock().expect("recorder lock poisoned");
        let mut events: Vec<StoredEvent> = inner
            .streams
            .get(&originator_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| select.gt.is_none_or(|gt| e.originator_version > gt))
                    .filter(|e| select.lte.is_none_or(|lte| e.originator_version <= lte))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        if select.desc {
            events.reverse();
        }
        if let Some(limit) = select.limit {
            events.truncate(limit);
        }
        tracing::trace!(events_selected = events.len(), "selected events");
        std::future::ready(Ok(events))
    }

    #[tracing::instrument(skip(self))]
    fn select_notifications(
        &self,
        start: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Notification>, RecorderError>> + Send {
        let inner = self.inner.lock().expect("recorder lock poisoned");
        // Ids are dense, so the notification with id `start` sits at index
        // `start - 1`.
        let skip = start.saturating_sub(1) as usize;
        let page: Vec<Notification> = inner
            .notifications
            .iter()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect();
        drop(inner);
        std::future::ready(Ok(page))
    }

    fn max_notification_id(&self) -> impl Future<Output = Result<u64, RecorderError>> + Send {
        let inner = self.inner.lock().expect("recorder lock poisoned");
        let max = inner.notifications.len() as u64;
        drop(inner);
        std::future::ready(Ok(max))
    }

    #[tracing::instrument(skip(self, snapshot), fields(originator_id = %snapshot.originator_id, originator_version = snapshot.originator_version))]
    fn insert_snapshot(
        &self,
        snapshot: StoredEvent,
    ) -> impl Future<Output = Result<(), RecorderError>> + Send {
        let mut inner = self.inner.lock().expect("recorder lock poisoned");
        let stream = inner.snapshots.entry(snapshot.originator_id).or_default();
        match stream
            .binary_search_by_key(&snapshot.originator_version, |s| s.originator_version)
        {
            Ok(index) => stream[index] = snapshot,
            Err(index) => stream.insert(index, snapshot),
        }
        drop(inner);
        std::future::ready(Ok(()))
    }

    #[tracing::instrument(skip(self))]
    fn select_snapshot(
        &self,
        originator_id: Uuid,
        lte: Option<u64>,
    ) -> impl Future<Output = Result<Option<StoredEvent>, RecorderError>> + Send {
        let inner = self.inner.lock().expect("recorder lock poisoned");
        let snapshot = inner.snapshots.get(&originator_id).and_then(|stream| {
            stream
                .iter()
                .rev()
                .find(|s| lte.is_none_or(|lte| s.originator_version <= lte))
                .cloned()
        });
        drop(inner);
        std::future::ready(Ok(snapshot))
    }
}
