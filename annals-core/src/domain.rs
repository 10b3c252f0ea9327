//! Domain-model primitives.
//!
//! This module defines the contract between user aggregates and the store:
//! the [`DomainEvent`] envelope, the [`EventPayload`] trait implemented by
//! event enums, the [`Root`] bookkeeping struct embedded in every aggregate,
//! and the [`Aggregate`] trait whose provided methods keep command-time and
//! replay-time mutation on the same code path.
//!
//! # Writing an aggregate
//!
//! ```ignore
//! #[derive(Clone, Serialize, Deserialize, PartialEq)]
//! struct World {
//!     root: Root<WorldEvent>,
//!     history: Vec<String>,
//! }
//!
//! impl World {
//!     fn register(name: &str) -> Result<Self, CreationError> {
//!         Self::originate(WorldEvent::Created { name: name.to_string() })
//!     }
//!
//!     fn make_it_so(&mut self, what: &str) {
//!         self.trigger(WorldEvent::SomethingHappened { what: what.to_string() });
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::transcoder::TranscodingError;

/// Payload contract for the event kinds of one aggregate.
///
/// Each variant carries a stable [`topic`](Self::topic) - a
/// `"<namespace>:<name>"` string identifying the kind for reconstruction -
/// and knows how to serialize its fields to a JSON document and back. The
/// [`TOPICS`](Self::TOPICS) list lets callers report what a payload type can
/// reconstruct when an unknown topic is encountered.
pub trait EventPayload: Clone + Send + Sync + Sized {
    /// Every topic this payload type can reconstruct.
    const TOPICS: &'static [&'static str];

    /// The topic of this particular payload.
    fn topic(&self) -> &'static str;

    /// Serialize this payload's fields to a JSON document (no kind tag - the
    /// topic travels separately in the stored record).
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::Malformed`] if a field cannot be
    /// represented.
    fn to_value(&self) -> Result<serde_json::Value, TranscodingError>;

    /// Rebuild a payload of the given topic from its JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::UnknownTopic`] for topics not in
    /// [`TOPICS`](Self::TOPICS), or [`TranscodingError::Malformed`] if the
    /// document does not match the payload's shape.
    fn from_value(topic: &str, value: serde_json::Value) -> Result<Self, TranscodingError>;
}

/// An immutable fact about one aggregate.
///
/// Two events with the same `(originator_id, originator_version)` are
/// forbidden by the recorder; versions for one aggregate are consecutive
/// positive integers starting at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent<P> {
    /// Stable identifier of the aggregate this event belongs to.
    pub originator_id: Uuid,
    /// Per-aggregate monotonic version, starting at 1.
    pub originator_version: u64,
    /// Wall-clock time the event was triggered.
    pub timestamp: DateTime<Utc>,
    /// Event-kind-specific payload.
    pub payload: P,
}

impl<P: EventPayload> DomainEvent<P> {
    /// The creation event of a new aggregate (version 1, fresh timestamp).
    #[must_use]
    pub fn created(originator_id: Uuid, payload: P) -> Self {
        Self {
            originator_id,
            originator_version: 1,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The payload's topic.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        self.payload.topic()
    }
}

/// The first event of an aggregate could not create it.
///
/// Raised by [`Aggregate::create`] when handed an event whose topic is not a
/// creation event for that aggregate kind. During replay this means the
/// stored history is corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event `{topic}` cannot create aggregate `{aggregate}`")]
pub struct CreationError {
    /// Topic of the aggregate kind being created.
    pub aggregate: &'static str,
    /// Topic of the offending event.
    pub topic: &'static str,
}

/// Identity, versioning, and the pending-event buffer shared by every
/// aggregate.
///
/// `Root` is embedded in user aggregate structs and drives the bookkeeping
/// half of event application: `version` always equals the version of the last
/// applied event, and `modified_on` its timestamp. The pending buffer holds
/// events that were applied in memory but not yet saved; it is never
/// serialized, so snapshots capture only durable state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct Root<P> {
    /// Stable aggregate identifier.
    pub id: Uuid,
    /// Version of the last applied event.
    pub version: u64,
    /// Timestamp of the creation event.
    pub created_on: DateTime<Utc>,
    /// Timestamp of the last applied event.
    pub modified_on: DateTime<Utc>,
    #[serde(skip)]
    pending: Vec<DomainEvent<P>>,
}

/// Equality ignores the pending buffer: two reconstitutions of the same
/// history compare equal regardless of uncommitted work.
impl<P> PartialEq for Root<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.version == other.version
            && self.created_on == other.created_on
            && self.modified_on == other.modified_on
    }
}

impl<P: EventPayload> Root<P> {
    /// Bookkeeping state implied by a creation event.
    #[must_use]
    pub fn from_created(event: &DomainEvent<P>) -> Self {
        Self {
            id: event.originator_id,
            version: event.originator_version,
            created_on: event.timestamp,
            modified_on: event.timestamp,
            pending: Vec::new(),
        }
    }

    /// Construct the next event in this aggregate's sequence.
    #[must_use]
    pub fn next_event(&self, payload: P) -> DomainEvent<P> {
        DomainEvent {
            originator_id: self.id,
            originator_version: self.version + 1,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Advance version and modification time past an applied event.
    pub fn advance(&mut self, event: &DomainEvent<P>) {
        self.version = event.originator_version;
        self.modified_on = event.timestamp;
    }

    /// Buffer an already-applied event for the next save.
    pub fn defer(&mut self, event: DomainEvent<P>) {
        self.pending.push(event);
    }

    /// Move the pending events out, emptying the buffer.
    pub fn collect_pending(&mut self) -> Vec<DomainEvent<P>> {
        std::mem::take(&mut self.pending)
    }

    /// Whether any events are waiting to be saved.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Command-side entity whose state is the fold of its event history.
///
/// Implementations supply state reconstruction (`create` for the first event,
/// `apply` for the rest) plus access to the embedded [`Root`]. The provided
/// methods route command-time and replay-time mutation through the same
/// [`play`](Self::play) path, which is what makes replay deterministic.
pub trait Aggregate: Sized + Send + Sync {
    /// Stable `"<namespace>:<name>"` identifier of this aggregate kind, used
    /// as the topic of its snapshots.
    const TOPIC: &'static str;

    /// The event payload enum for this aggregate kind.
    type Payload: EventPayload;

    /// The embedded bookkeeping root.
    fn root(&self) -> &Root<Self::Payload>;

    /// Mutable access to the embedded bookkeeping root.
    fn root_mut(&mut self) -> &mut Root<Self::Payload>;

    /// Build initial state from a creation event.
    ///
    /// Implementations construct their `Root` with
    /// [`Root::from_created`].
    ///
    /// # Errors
    ///
    /// Returns [`CreationError`] when the event's topic is not a creation
    /// event for this aggregate kind.
    fn create(event: &DomainEvent<Self::Payload>) -> Result<Self, CreationError>;

    /// Apply a subsequent event to domain state.
    ///
    /// Bookkeeping (version, modification time) is handled by
    /// [`play`](Self::play); implementations mutate domain fields only.
    fn apply(&mut self, event: &DomainEvent<Self::Payload>);

    /// Stable aggregate identifier.
    fn id(&self) -> Uuid {
        self.root().id
    }

    /// Version of the last applied event.
    fn version(&self) -> u64 {
        self.root().version
    }

    /// Start a new aggregate from a creation payload.
    ///
    /// Draws a fresh id, constructs the version-1 event, applies it, and
    /// buffers it for the next save.
    ///
    /// # Errors
    ///
    /// Returns [`CreationError`] if the payload is not a creation payload for
    /// this aggregate kind.
    fn originate(payload: Self::Payload) -> Result<Self, CreationError> {
        let event = DomainEvent::created(Uuid::new_v4(), payload);
        let mut aggregate = Self::create(&event)?;
        aggregate.root_mut().defer(event);
        Ok(aggregate)
    }

    /// Trigger a new event: construct it, apply it, and buffer it.
    ///
    /// This is the command-side entry point. The event is applied through
    /// [`play`](Self::play) before being buffered, so collected events are
    /// always already reflected in aggregate state.
    fn trigger(&mut self, payload: Self::Payload) {
        let event = self.root().next_event(payload);
        self.play(&event);
        self.root_mut().defer(event);
    }

    /// Apply an event and advance bookkeeping. Used by both
    /// [`trigger`](Self::trigger) and replay.
    fn play(&mut self, event: &DomainEvent<Self::Payload>) {
        self.apply(event);
        self.root_mut().advance(event);
    }

    /// Move the pending events out of the buffer, emptying it.
    fn collect_pending(&mut self) -> Vec<DomainEvent<Self::Payload>> {
        self.root_mut().collect_pending()
    }
}
