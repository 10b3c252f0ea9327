//! Byte-level encoding of event state.
//!
//! A [`Transcoder`] turns the self-describing state document built by the
//! mapper into bytes and back. The default [`JsonTranscoder`] is backed by
//! `serde_json`; alternative encodings plug in at this seam without touching
//! the mapper or the recorders.
//!
//! Custom domain values do not register with the transcoder directly - they
//! implement `serde` traits on the payload types, which keeps the round-trip
//! property (`decode(encode(v)) == v`) a property of the type rather than of
//! a runtime registry.

use thiserror::Error;

/// Error raised while encoding or decoding event state.
#[derive(Debug, Error)]
pub enum TranscodingError {
    /// The state topic was not recognized by the payload type.
    #[error("unknown topic `{topic}`, expected one of {expected:?}")]
    UnknownTopic {
        /// The unrecognized topic string.
        topic: String,
        /// The topics the payload type can reconstruct.
        expected: &'static [&'static str],
    },
    /// The stored state was written by a newer schema than this build knows.
    #[error("state for topic `{topic}` has schema version {version}, newer than this build")]
    FutureSchema {
        /// Topic of the offending record.
        topic: String,
        /// Schema version found in the stored state.
        version: u32,
    },
    /// The state bytes or document did not match the expected shape.
    #[error("malformed state: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Mapping between in-memory state documents and a byte encoding.
///
/// Implementations must be lossless: `decode(encode(v)) == v` for every value
/// the payload types produce.
pub trait Transcoder: Clone + Send + Sync {
    /// Encode a state document to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::Malformed`] if the document cannot be
    /// represented in the target encoding.
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, TranscodingError>;

    /// Decode bytes back into a state document.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::Malformed`] for bytes that are not a valid
    /// document in this encoding.
    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, TranscodingError>;
}

/// JSON transcoder backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonTranscoder;

impl Transcoder for JsonTranscoder {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, TranscodingError> {
        serde_json::to_vec(value).map_err(TranscodingError::from)
    }

    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, TranscodingError> {
        serde_json::from_slice(data).map_err(TranscodingError::from)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_transcoder_roundtrips() {
        let transcoder = JsonTranscoder;
        let value = json!({"name": "Earth", "age": 4_500_000_000_u64});
        let bytes = transcoder.encode(&value).unwrap();
        assert_eq!(transcoder.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn json_transcoder_rejects_invalid_bytes() {
        let transcoder = JsonTranscoder;
        let result = transcoder.decode(b"not valid json");
        assert!(matches!(result, Err(TranscodingError::Malformed(_))));
    }

    #[test]
    fn unknown_topic_lists_expected() {
        let err = TranscodingError::UnknownTopic {
            topic: "world:Unheard".to_string(),
            expected: &["world:Created"],
        };
        let msg = err.to_string();
        assert!(msg.contains("world:Unheard"));
        assert!(msg.contains("world:Created"));
    }
}
