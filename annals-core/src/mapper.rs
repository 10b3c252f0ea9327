//! Binding between domain events and stored records.
//!
//! The [`Mapper`] derives the stored `topic` from an event's payload and runs
//! its state through the write pipeline (transcode, then optionally compress,
//! then optionally encrypt); reading reverses the pipeline and passes the
//! decoded document through the registered [`Upcasters`] before the payload
//! is reconstructed.
//!
//! The pre-pipeline state document is
//! `{"timestamp": <rfc3339>, "v": <schema version>, "data": {payload fields}}`,
//! with `v` omitted at version 1. The timestamp travels inside the state
//! because the stored record schema has no timestamp column.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    cipher::{Cipher, DataIntegrityError},
    compressor::{CompressionError, Compressor},
    domain::{Aggregate, DomainEvent, EventPayload},
    recorder::StoredEvent,
    transcoder::{JsonTranscoder, Transcoder, TranscodingError},
};

/// Error raised while mapping between domain events and stored records.
#[derive(Debug, Error)]
pub enum MapperError {
    /// Unknown topic or malformed state document.
    #[error(transparent)]
    Transcoding(#[from] TranscodingError),
    /// Ciphertext tampering or truncation.
    #[error("data integrity error: {0}")]
    Integrity(#[from] DataIntegrityError),
    /// Corrupt compressed state.
    #[error("data integrity error: {0}")]
    Compression(#[from] CompressionError),
}

/// Pure state transform from one schema version to the next.
type Upcast = Box<dyn Fn(serde_json::Value) -> serde_json::Value + Send + Sync>;

/// Ordered upcast chains keyed by topic.
///
/// Registering `n` transforms for a topic makes its current schema version
/// `n + 1`; a record stored at version `k` has transforms `k..` applied to
/// its `data` document on read. Transforms are pure and applied in
/// registration order.
#[derive(Default)]
pub struct Upcasters {
    chains: HashMap<&'static str, Vec<Upcast>>,
}

impl Upcasters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transform taking `topic` from its current version to the
    /// next.
    pub fn register(
        &mut self,
        topic: &'static str,
        upcast: impl Fn(serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    ) {
        self.chains.entry(topic).or_default().push(Box::new(upcast));
    }

    /// The schema version current code writes for `topic`.
    #[must_use]
    pub fn current_version(&self, topic: &str) -> u32 {
        1 + self.chains.get(topic).map_or(0, |chain| chain.len() as u32)
    }

    /// Bring a `data` document stored at `from` up to the current version.
    fn upcast(
        &self,
        topic: &str,
        from: u32,
        mut data: serde_json::Value,
    ) -> Result<serde_json::Value, TranscodingError> {
        let current = self.current_version(topic);
        if from > current {
            return Err(TranscodingError::FutureSchema {
                topic: topic.to_string(),
                version: from,
            });
        }
        // Version 1 is the implicit floor; a missing or zero `v` reads as 1.
        let from = from.max(1) as usize;
        if let Some(chain) = self.chains.get(topic) {
            for upcast in &chain[from - 1..] {
                data = upcast(data);
            }
        }
        Ok(data)
    }
}

impl std::fmt::Debug for Upcasters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.chains.iter().map(|(topic, chain)| (topic, chain.len())))
            .finish()
    }
}

/// The pre-pipeline state document.
#[derive(Serialize, Deserialize)]
struct StateDoc {
    timestamp: DateTime<Utc>,
    #[serde(
        rename = "v",
        default = "schema_one",
        skip_serializing_if = "is_schema_one"
    )]
    schema: u32,
    data: serde_json::Value,
}

const fn schema_one() -> u32 {
    1
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_schema_one(schema: &u32) -> bool {
    *schema == 1
}

/// Maps domain events (and aggregate snapshots) to stored records and back.
///
/// Mappers are pure and cheap to clone: the optional pipeline stages are
/// shared behind `Arc`, and cipher keys and compressor configuration are
/// immutable after construction.
#[derive(Clone)]
pub struct Mapper<T = JsonTranscoder> {
    transcoder: T,
    compressor: Option<Arc<dyn Compressor>>,
    cipher: Option<Arc<dyn Cipher>>,
    upcasters: Arc<Upcasters>,
}

impl Default for Mapper<JsonTranscoder> {
    fn default() -> Self {
        Self::new(JsonTranscoder)
    }
}

impl<T: Transcoder> Mapper<T> {
    #[must_use]
    pub fn new(transcoder: T) -> Self {
        Self {
            transcoder,
            compressor: None,
            cipher: None,
            upcasters: Arc::new(Upcasters::default()),
        }
    }

    /// Compress state after transcoding.
    #[must_use]
    pub fn with_compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Some(Arc::new(compressor));
        self
    }

    /// Encrypt state as the final write stage.
    #[must_use]
    pub fn with_cipher(mut self, cipher: impl Cipher + 'static) -> Self {
        self.cipher = Some(Arc::new(cipher));
        self
    }

    /// Install upcast chains for older stored schemas.
    #[must_use]
    pub fn with_upcasters(mut self, upcasters: Upcasters) -> Self {
        self.upcasters = Arc::new(upcasters);
        self
    }

    /// Derive the stored record for a domain event.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError`] if the payload or state document cannot be
    /// encoded or a pipeline stage fails.
    pub fn from_domain<P: EventPayload>(
        &self,
        event: &DomainEvent<P>,
    ) -> Result<StoredEvent, MapperError> {
        let topic = event.topic();
        let state = self.seal(StateDoc {
            timestamp: event.timestamp,
            schema: self.upcasters.current_version(topic),
            data: event.payload.to_value()?,
        })?;
        Ok(StoredEvent {
            originator_id: event.originator_id,
            originator_version: event.originator_version,
            topic: topic.to_string(),
            state,
        })
    }

    /// Reconstruct the domain event for a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Integrity`] for tampered or corrupt state and
    /// [`MapperError::Transcoding`] for unknown topics or malformed
    /// documents.
    pub fn to_domain<P: EventPayload>(
        &self,
        stored: &StoredEvent,
    ) -> Result<DomainEvent<P>, MapperError> {
        let doc = self.unseal(&stored.state)?;
        let data = self.upcasters.upcast(&stored.topic, doc.schema, doc.data)?;
        Ok(DomainEvent {
            originator_id: stored.originator_id,
            originator_version: stored.originator_version,
            timestamp: doc.timestamp,
            payload: P::from_value(&stored.topic, data)?,
        })
    }

    /// Capture an aggregate's full state as a snapshot record.
    ///
    /// Snapshots run through the same pipeline as events, so they are
    /// compressed and encrypted identically. The pending-event buffer is not
    /// part of serialized state.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError`] if the aggregate cannot be serialized or a
    /// pipeline stage fails.
    pub fn from_aggregate<A>(&self, aggregate: &A) -> Result<StoredEvent, MapperError>
    where
        A: Aggregate + Serialize,
    {
        let state = self.seal(StateDoc {
            timestamp: aggregate.root().modified_on,
            schema: self.upcasters.current_version(A::TOPIC),
            data: serde_json::to_value(aggregate).map_err(TranscodingError::from)?,
        })?;
        Ok(StoredEvent {
            originator_id: aggregate.id(),
            originator_version: aggregate.version(),
            topic: A::TOPIC.to_string(),
            state,
        })
    }

    /// Reconstitute an aggregate from a snapshot record.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError`] for pipeline failures, topic mismatches, or a
    /// state document that does not match the aggregate's shape.
    pub fn to_aggregate<A>(&self, stored: &StoredEvent) -> Result<A, MapperError>
    where
        A: Aggregate + DeserializeOwned,
    {
        if stored.topic != A::TOPIC {
            return Err(TranscodingError::UnknownTopic {
                topic: stored.topic.clone(),
                expected: &[],
            }
            .into());
        }
        let doc = self.unseal(&stored.state)?;
        let data = self.upcasters.upcast(&stored.topic, doc.schema, doc.data)?;
        let aggregate = serde_json::from_value(data).map_err(TranscodingError::from)?;
        Ok(aggregate)
    }

    /// Run the write pipeline: transcode, compress, encrypt.
    fn seal(&self, doc: StateDoc) -> Result<Vec<u8>, MapperError> {
        let value = serde_json::to_value(&doc).map_err(TranscodingError::from)?;
        let mut state = self.transcoder.encode(&value)?;
        if let Some(compressor) = &self.compressor {
            state = compressor.compress(&state)?;
        }
        if let Some(cipher) = &self.cipher {
            state = cipher.encrypt(&state);
        }
        Ok(state)
    }

    /// Reverse the pipeline: decrypt, decompress, decode.
    fn unseal(&self, state: &[u8]) -> Result<StateDoc, MapperError> {
        let mut state = state.to_vec();
        if let Some(cipher) = &self.cipher {
            state = cipher.decrypt(&state)?;
        }
        if let Some(compressor) = &self.compressor {
            state = compressor.decompress(&state)?;
        }
        let value = self.transcoder.decode(&state)?;
        let doc = serde_json::from_value(value).map_err(TranscodingError::from)?;
        Ok(doc)
    }
}
