//! Composition of mapper and recorder.
//!
//! The [`EventStore`] is the thin seam between domain events and stored
//! records: `put` maps a batch and appends it atomically, `get` reads and
//! maps back in version order. All policy lives in the mapper and the
//! recorder; the store only composes them.

use std::{marker::PhantomData, sync::Arc};

use nonempty::NonEmpty;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    domain::{DomainEvent, EventPayload},
    mapper::{Mapper, MapperError},
    recorder::{EventSelect, Recorder, RecorderError},
    transcoder::{JsonTranscoder, Transcoder},
};

/// Error from event store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Mapping between domain and stored form failed.
    #[error(transparent)]
    Mapper(#[from] MapperError),
    /// The recorder rejected or failed the operation.
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

impl StoreError {
    /// Whether this error is the optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Recorder(RecorderError::Conflict(_)))
    }
}

/// Typed event access over a recorder.
///
/// Cheap to clone; clones share the recorder.
pub struct EventStore<P, R, T = JsonTranscoder> {
    recorder: Arc<R>,
    mapper: Mapper<T>,
    _payload: PhantomData<fn() -> P>,
}

impl<P, R, T: Clone> Clone for EventStore<P, R, T> {
    fn clone(&self) -> Self {
        Self {
            recorder: Arc::clone(&self.recorder),
            mapper: self.mapper.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P, R, T> EventStore<P, R, T>
where
    P: EventPayload,
    R: Recorder,
    T: Transcoder,
{
    #[must_use]
    pub fn new(recorder: Arc<R>, mapper: Mapper<T>) -> Self {
        Self {
            recorder,
            mapper,
            _payload: PhantomData,
        }
    }

    /// Atomically append a batch of domain events.
    ///
    /// Returns the assigned notification ids, in batch order. An empty batch
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Recorder`] with a conflict when any event's
    /// `(originator_id, originator_version)` is already recorded, leaving
    /// state unchanged.
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    pub async fn put(&self, events: &[DomainEvent<P>]) -> Result<Vec<u64>, StoreError> {
        let stored = events
            .iter()
            .map(|event| self.mapper.from_domain(event))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(batch) = NonEmpty::from_vec(stored) else {
            tracing::trace!("empty batch, nothing to record");
            return Ok(Vec::new());
        };
        let ids = self.recorder.insert_events(batch).await?;
        tracing::debug!(notification_ids = ?ids, "events recorded");
        Ok(ids)
    }

    /// Read one aggregate's events in `originator_version` order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for recorder failures or records that cannot be
    /// mapped back.
    pub async fn get(
        &self,
        originator_id: Uuid,
        select: EventSelect,
    ) -> Result<Vec<DomainEvent<P>>, StoreError> {
        let stored = self.recorder.select_events(originator_id, select).await?;
        let events = stored
            .iter()
            .map(|record| self.mapper.to_domain(record))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub(crate) fn recorder(&self) -> &Arc<R> {
        &self.recorder
    }

    pub(crate) fn mapper(&self) -> &Mapper<T> {
        &self.mapper
    }
}
