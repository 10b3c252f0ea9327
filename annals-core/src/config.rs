//! Configuration at the boundary.
//!
//! The core consumes already-constructed recorders and mappers; this module
//! holds the recognized configuration options as a plain struct, parses them
//! from the environment, and resolves cipher/compressor topics to the
//! implementations shipped with the crate. Backend construction from the
//! `INFRASTRUCTURE_FACTORY` topic happens at the composition root of the
//! embedding application, not here.

use thiserror::Error;

use crate::{
    cipher::AesGcmCipher,
    compressor::ZlibCompressor,
    mapper::{Mapper, Upcasters},
    transcoder::JsonTranscoder,
};

/// Topic of the AES-256-GCM cipher shipped with this crate.
pub const AES_GCM_CIPHER_TOPIC: &str = "annals.cipher:AesGcmCipher";

/// Topic of the zlib compressor shipped with this crate.
pub const ZLIB_COMPRESSOR_TOPIC: &str = "annals.compressor:ZlibCompressor";

/// Environment variable names recognized by [`Config::from_env`].
const INFRASTRUCTURE_FACTORY: &str = "INFRASTRUCTURE_FACTORY";
const SQLITE_DBNAME: &str = "SQLITE_DBNAME";
const POSTGRES_DBNAME: &str = "POSTGRES_DBNAME";
const POSTGRES_HOST: &str = "POSTGRES_HOST";
const POSTGRES_PORT: &str = "POSTGRES_PORT";
const POSTGRES_USER: &str = "POSTGRES_USER";
const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
const CIPHER_TOPIC: &str = "CIPHER_TOPIC";
const CIPHER_KEY: &str = "CIPHER_KEY";
const COMPRESSOR_TOPIC: &str = "COMPRESSOR_TOPIC";

/// Error raised while reading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A topic does not resolve to a known implementation.
    #[error("unknown {kind} topic `{topic}`")]
    UnknownTopic {
        /// What the topic was supposed to select ("cipher", "compressor").
        kind: &'static str,
        /// The unresolvable topic string.
        topic: String,
    },
    /// A cipher topic was configured without key material.
    #[error("`{CIPHER_TOPIC}` is set but `{CIPHER_KEY}` is missing")]
    MissingCipherKey,
    /// The cipher key is not hex-encoded key material of the right length.
    #[error("`{CIPHER_KEY}` must be {expected} hex-encoded bytes")]
    InvalidCipherKey {
        /// Required key length in bytes.
        expected: usize,
    },
    /// A numeric option failed to parse.
    #[error("`{name}` is not a valid number: {value}")]
    InvalidNumber {
        /// Environment variable name.
        name: &'static str,
        /// The offending value.
        value: String,
    },
}

/// The recognized configuration options, as a plain struct.
///
/// All fields are optional; absence selects the defaults (no cipher, no
/// compressor, backend chosen by the composition root).
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Recorder backend selection, by topic string.
    pub infrastructure_factory: Option<String>,
    /// Embedded-SQL file path, or a sentinel for in-memory.
    pub sqlite_dbname: Option<String>,
    pub postgres_dbname: Option<String>,
    pub postgres_host: Option<String>,
    pub postgres_port: Option<u16>,
    pub postgres_user: Option<String>,
    pub postgres_password: Option<String>,
    /// Cipher selection, by topic string.
    pub cipher_topic: Option<String>,
    /// Hex-encoded cipher key material.
    pub cipher_key: Option<String>,
    /// Compressor selection, by topic string.
    pub compressor_topic: Option<String>,
}

impl Config {
    /// Read the recognized options from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidNumber`] if `POSTGRES_PORT` is set but
    /// not a valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let postgres_port = var(POSTGRES_PORT)
            .map(|value| {
                value.parse().map_err(|_| ConfigError::InvalidNumber {
                    name: POSTGRES_PORT,
                    value,
                })
            })
            .transpose()?;

        Ok(Self {
            infrastructure_factory: var(INFRASTRUCTURE_FACTORY),
            sqlite_dbname: var(SQLITE_DBNAME),
            postgres_dbname: var(POSTGRES_DBNAME),
            postgres_host: var(POSTGRES_HOST),
            postgres_port,
            postgres_user: var(POSTGRES_USER),
            postgres_password: var(POSTGRES_PASSWORD),
            cipher_topic: var(CIPHER_TOPIC),
            cipher_key: var(CIPHER_KEY),
            compressor_topic: var(COMPRESSOR_TOPIC),
        })
    }

    /// Build a JSON mapper with the configured cipher and compressor.
    ///
    /// Topic resolution is deterministic and side-effect free: the topics
    /// shipped with this crate are the only ones recognized here.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTopic`] for unrecognized topics and key
    /// errors for missing or malformed cipher key material.
    pub fn build_mapper(&self, upcasters: Upcasters) -> Result<Mapper<JsonTranscoder>, ConfigError> {
        let mut mapper = Mapper::new(JsonTranscoder).with_upcasters(upcasters);

        if let Some(topic) = &self.compressor_topic {
            if topic != ZLIB_COMPRESSOR_TOPIC {
                return Err(ConfigError::UnknownTopic {
                    kind: "compressor",
                    topic: topic.clone(),
                });
            }
            mapper = mapper.with_compressor(ZlibCompressor);
        }

        if let Some(topic) = &self.cipher_topic {
            if topic != AES_GCM_CIPHER_TOPIC {
                return Err(ConfigError::UnknownTopic {
                    kind: "cipher",
                    topic: topic.clone(),
                });
            }
            let key = self.decode_cipher_key()?;
            mapper = mapper.with_cipher(AesGcmCipher::new(key));
        }

        Ok(mapper)
    }

    fn decode_cipher_key(&self) -> Result<[u8; 32], ConfigError> {
        let encoded = self
            .cipher_key
            .as_deref()
            .ok_or(ConfigError::MissingCipherKey)?;
        let bytes = hex::decode(encoded)
            .map_err(|_| ConfigError::InvalidCipherKey { expected: 32 })?;
        bytes
            .try_into()
            .map_err(|_| ConfigError::InvalidCipherKey { expected: 32 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{DEFAULT_KEY_LEN, generate_key};

    fn key_hex() -> String {
        hex::encode(generate_key(DEFAULT_KEY_LEN))
    }

    #[test]
    fn default_config_builds_a_plain_mapper() {
        let config = Config::default();
        assert!(config.build_mapper(Upcasters::new()).is_ok());
    }

    #[test]
    fn known_topics_resolve() {
        let config = Config {
            cipher_topic: Some(AES_GCM_CIPHER_TOPIC.to_string()),
            cipher_key: Some(key_hex()),
            compressor_topic: Some(ZLIB_COMPRESSOR_TOPIC.to_string()),
            ..Config::default()
        };
        assert!(config.build_mapper(Upcasters::new()).is_ok());
    }

    #[test]
    fn unknown_cipher_topic_is_rejected() {
        let config = Config {
            cipher_topic: Some("annals.cipher:Rot13".to_string()),
            cipher_key: Some(key_hex()),
            ..Config::default()
        };
        assert!(matches!(
            config.build_mapper(Upcasters::new()),
            Err(ConfigError::UnknownTopic { kind: "cipher", .. })
        ));
    }

    #[test]
    fn unknown_compressor_topic_is_rejected() {
        let config = Config {
            compressor_topic: Some("annals.compressor:Middle-Out".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.build_mapper(Upcasters::new()),
            Err(ConfigError::UnknownTopic {
                kind: "compressor",
                ..
            })
        ));
    }

    #[test]
    fn cipher_without_key_is_rejected() {
        let config = Config {
            cipher_topic: Some(AES_GCM_CIPHER_TOPIC.to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.build_mapper(Upcasters::new()),
            Err(ConfigError::MissingCipherKey)
        ));
    }

    #[test]
    fn short_cipher_key_is_rejected() {
        let config = Config {
            cipher_topic: Some(AES_GCM_CIPHER_TOPIC.to_string()),
            cipher_key: Some(hex::encode(generate_key(16))),
            ..Config::default()
        };
        assert!(matches!(
            config.build_mapper(Upcasters::new()),
            Err(ConfigError::InvalidCipherKey { expected: 32 })
        ));
    }
}
