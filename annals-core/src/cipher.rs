//! Authenticated encryption of stored state.
//!
//! When a cipher is configured, state bytes are encrypted as the last write
//! stage and decrypted as the first read stage, so everything after the
//! recorder boundary - including snapshots - is opaque at rest. The shipped
//! implementation is AES-256-GCM; the ciphertext layout is
//! `nonce || ciphertext || tag`, so each record is self-contained.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;

/// Default key length in bytes produced by [`generate_key`].
pub const DEFAULT_KEY_LEN: usize = 32;

/// Length of the nonce prefixed to every ciphertext.
const NONCE_LEN: usize = 12;

/// Error raised when stored state fails decryption.
///
/// Both variants mean the record cannot be trusted; the mapper surfaces them
/// as integrity violations rather than retrying.
#[derive(Debug, Error)]
pub enum DataIntegrityError {
    /// The ciphertext is shorter than a nonce and tag.
    #[error("ciphertext is truncated")]
    Truncated,
    /// Authentication failed: the ciphertext was tampered with or the key is
    /// wrong.
    #[error("ciphertext failed authentication")]
    Tampered,
}

/// Authenticated symmetric encryption of state bytes.
pub trait Cipher: Send + Sync {
    /// Encrypt plaintext, embedding nonce and authentication tag.
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;

    /// Reverse [`encrypt`](Self::encrypt), verifying authenticity.
    ///
    /// # Errors
    ///
    /// Returns [`DataIntegrityError`] if the ciphertext is truncated or fails
    /// authentication.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DataIntegrityError>;
}

/// Generate key material: `len` random bytes from the OS generator.
#[must_use]
pub fn generate_key(len: usize) -> Vec<u8> {
    let mut key = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// AES-256-GCM cipher with a fixed key.
///
/// The key is immutable after construction; a fresh random nonce is drawn for
/// every encryption.
#[derive(Clone)]
pub struct AesGcmCipher {
    key: Key<Aes256Gcm>,
}

impl AesGcmCipher {
    /// Construct a cipher from 32 bytes of key material.
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self { key: key.into() }
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let sealed = Aes256Gcm::new(&self.key)
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .expect("AES-GCM encryption is infallible for in-memory buffers");

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        out
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DataIntegrityError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(DataIntegrityError::Truncated);
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        Aes256Gcm::new(&self.key)
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| DataIntegrityError::Tampered)
    }
}
