//! Durable storage contract for event records.
//!
//! The [`Recorder`] is the durability and ordering nucleus: it appends
//! batches of [`StoredEvent`]s atomically, enforces the optimistic
//! concurrency protocol by `(originator_id, originator_version)` uniqueness,
//! assigns dense monotonic notification ids in commit order, and keeps the
//! separate snapshot stream. The reference [`inmemory`] implementation is the
//! behavioural model for database backends.
//!
//! # Notification-id density
//!
//! Returning a notification with id `k` implies every id `< k` is also
//! readable. Implementations must serialize id assignment with commit
//! visibility; see each backend's documentation for its strategy.

use std::future::Future;

pub use nonempty::NonEmpty;
use thiserror::Error;
use uuid::Uuid;

pub mod inmemory;

/// The recorder-level event record.
///
/// `state` is the opaque post-pipeline payload; the primary key is
/// `(originator_id, originator_version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub originator_id: Uuid,
    /// Per-aggregate monotonic version, starting at 1.
    pub originator_version: u64,
    /// Stable kind identifier for reconstruction.
    pub topic: String,
    /// Opaque post-pipeline payload bytes.
    pub state: Vec<u8>,
}

/// A stored event exposed with its globally monotonic notification id.
///
/// Ids are assigned in commit order and are dense within one recorder
/// instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Dense, strictly increasing, 1-based.
    pub id: u64,
    /// The underlying event record.
    pub event: StoredEvent,
}

/// Options narrowing a [`Recorder::select_events`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSelect {
    /// Only versions strictly greater than this value.
    pub gt: Option<u64>,
    /// Only versions less than or equal to this value.
    pub lte: Option<u64>,
    /// Return in descending version order.
    pub desc: bool,
    /// Cap the number of returned records.
    pub limit: Option<usize>,
}

impl EventSelect {
    /// Every recorded event, in ascending version order.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only versions strictly greater than `version`.
    ///
    /// Used for snapshot-based loading to skip already-applied events.
    #[must_use]
    pub const fn after(mut self, version: u64) -> Self {
        self.gt = Some(version);
        self
    }

    /// Only versions less than or equal to `version`.
    #[must_use]
    pub const fn up_to(mut self, version: u64) -> Self {
        self.lte = Some(version);
        self
    }

    /// Return newest-first.
    #[must_use]
    pub const fn descending(mut self) -> Self {
        self.desc = true;
        self
    }

    /// Cap the number of returned records.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Optimistic concurrency violation: the batch collided with an existing
/// `(originator_id, originator_version)` record.
///
/// Not fatal - the first committer won, and the loser reloads and retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "record conflict: version {originator_version} of aggregate {originator_id} is already \
     recorded (hint: reload the aggregate and retry)"
)]
pub struct RecordConflict {
    pub originator_id: Uuid,
    pub originator_version: u64,
}

/// Caller contract violations that no retry will fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgrammingError {
    /// Originator versions are positive; 0 is not a recordable version.
    #[error("originator version 0 for aggregate {originator_id}: versions start at 1")]
    ZeroVersion { originator_id: Uuid },
    /// A batch's versions for one aggregate must be consecutive.
    #[error("batch versions for aggregate {originator_id} are not consecutive")]
    NonConsecutiveBatch { originator_id: Uuid },
}

/// Error taxonomy of recorder operations.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Concurrent version collision; reload and retry.
    #[error(transparent)]
    Conflict(#[from] RecordConflict),
    /// Underlying store failure. Whether a retry can help is
    /// backend-specific; consult the backend's documentation.
    #[error("persistence failure: {0}")]
    Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A record came back corrupted or in an impossible state.
    #[error("integrity violation: {0}")]
    Integrity(String),
    /// Contract violation by the caller.
    #[error(transparent)]
    Programming(#[from] ProgrammingError),
}

impl RecorderError {
    /// Wrap a backend failure.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Box::new(err))
    }

    /// Whether this error is the optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Reject batches that violate the version contract before touching storage.
///
/// Checks that every version is positive and that each aggregate's versions
/// within the batch are consecutive. Shared by all backends so the
/// [`ProgrammingError`] surface is uniform.
///
/// # Errors
///
/// Returns the first violated [`ProgrammingError`].
pub fn validate_batch(batch: &NonEmpty<StoredEvent>) -> Result<(), ProgrammingError> {
    let mut last_version: std::collections::HashMap<Uuid, u64> = std::collections::HashMap::new();
    for event in batch {
        if event.originator_version == 0 {
            return Err(ProgrammingError::ZeroVersion {
                originator_id: event.originator_id,
            });
        }
        if let Some(previous) = last_version.get(&event.originator_id)
            && event.originator_version != previous + 1
        {
            return Err(ProgrammingError::NonConsecutiveBatch {
                originator_id: event.originator_id,
            });
        }
        last_version.insert(event.originator_id, event.originator_version);
    }
    Ok(())
}

/// Durable append and read of event records and snapshots.
///
/// The recorder owns all storage handles and mediates all mutation; it must
/// be safe for multiple concurrent writers and readers. Any operation may
/// block on I/O.
pub trait Recorder: Send + Sync {
    /// Atomically append a batch belonging to one or more aggregates.
    ///
    /// Either all events become visible and receive dense increasing
    /// notification ids (returned in batch order), or none do.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Conflict`] if any event collides with an
    /// existing `(originator_id, originator_version)`, leaving state
    /// unchanged, or [`RecorderError::Programming`] for invalid batches.
    fn insert_events(
        &self,
        batch: NonEmpty<StoredEvent>,
    ) -> impl Future<Output = Result<Vec<u64>, RecorderError>> + Send;

    /// Read one aggregate's events, ordered by `originator_version`.
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError`] when the underlying store fails.
    fn select_events(
        &self,
        originator_id: Uuid,
        select: EventSelect,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, RecorderError>> + Send;

    /// Read up to `limit` notifications with `id >= start`, ordered by id
    /// and contiguous.
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError`] when the underlying store fails.
    fn select_notifications(
        &self,
        start: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Notification>, RecorderError>> + Send;

    /// The highest assigned notification id, or 0 when nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError`] when the underlying store fails.
    fn max_notification_id(&self) -> impl Future<Output = Result<u64, RecorderError>> + Send;

    /// Record a snapshot in the separate snapshot stream.
    ///
    /// Re-recording a snapshot at an existing version overwrites it.
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError`] when the underlying store fails.
    fn insert_snapshot(
        &self,
        snapshot: StoredEvent,
    ) -> impl Future<Output = Result<(), RecorderError>> + Send;

    /// The latest snapshot with `originator_version <= lte` (any version when
    /// `lte` is `None`).
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError`] when the underlying store fails.
    fn select_snapshot(
        &self,
        originator_id: Uuid,
        lte: Option<u64>,
    ) -> impl Future<Output = Result<Option<StoredEvent>, RecorderError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: Uuid, version: u64) -> StoredEvent {
        StoredEvent {
            originator_id: id,
            originator_version: version,
            topic: "world:SomethingHappened".to_string(),
            state: b"{}".to_vec(),
        }
    }

    #[test]
    fn select_builder_composes() {
        let select = EventSelect::all().after(2).up_to(7).descending().limit(3);
        assert_eq!(
            select,
            EventSelect {
                gt: Some(2),
                lte: Some(7),
                desc: true,
                limit: Some(3),
            }
        );
    }

    #[test]
    fn validate_accepts_interleaved_aggregates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let batch = NonEmpty::from_vec(vec![
            stored(a, 1),
            stored(b, 1),
            stored(a, 2),
            stored(b, 2),
        ])
        .unwrap();
        assert!(validate_batch(&batch).is_ok());
    }

    #[test]
    fn validate_rejects_version_zero() {
        let batch = NonEmpty::singleton(stored(Uuid::new_v4(), 0));
        assert!(matches!(
            validate_batch(&batch),
            Err(ProgrammingError::ZeroVersion { .. })
        ));
    }

    #[test]
    fn validate_rejects_gaps_within_a_batch() {
        let id = Uuid::new_v4();
        let batch = NonEmpty::from_vec(vec![stored(id, 1), stored(id, 3)]).unwrap();
        assert!(matches!(
            validate_batch(&batch),
            Err(ProgrammingError::NonConsecutiveBatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_duplicate_versions_within_a_batch() {
        let id = Uuid::new_v4();
        let batch = NonEmpty::from_vec(vec![stored(id, 2), stored(id, 2)]).unwrap();
        assert!(matches!(
            validate_batch(&batch),
            Err(ProgrammingError::NonConsecutiveBatch { .. })
        ));
    }

    #[test]
    fn conflict_message_carries_the_colliding_pair() {
        let id = Uuid::new_v4();
        let conflict = RecordConflict {
            originator_id: id,
            originator_version: 4,
        };
        let msg = conflict.to_string();
        assert!(msg.contains("version 4"));
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("reload"));
    }
}
