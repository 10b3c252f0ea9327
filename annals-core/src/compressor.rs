//! Optional byte-size reduction for stored state.
//!
//! Compression sits between the transcoder and the cipher: state is
//! compressed after encoding and decompressed before decoding. Absence of a
//! compressor means identity - the mapper simply skips the stage.

use std::io::{Read, Write};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use thiserror::Error;

/// Error raised by a compression stage.
///
/// Decompression failures indicate corrupt stored state and are treated as
/// integrity violations by the mapper.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),
    #[error("corrupt compressed state: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Symmetric, lossless byte-size reduction.
pub trait Compressor: Send + Sync {
    /// Compress bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CompressionError::Compress`] if the underlying encoder
    /// fails.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Reverse [`compress`](Self::compress).
    ///
    /// # Errors
    ///
    /// Returns [`CompressionError::Decompress`] for bytes that are not a
    /// valid compressed stream.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// Zlib compressor backed by `flate2`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZlibCompressor;

impl Compressor for ZlibCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).map_err(CompressionError::Compress)?;
        encoder.finish().map_err(CompressionError::Compress)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(CompressionError::Decompress)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_roundtrips_losslessly() {
        let compressor = ZlibCompressor;
        let data = br#"{"timestamp":"2026-01-01T00:00:00Z","data":{"what":"dinosaurs"}}"#;
        let compressed = compressor.compress(data).unwrap();
        assert_eq!(compressor.decompress(&compressed).unwrap(), data.to_vec());
    }

    #[test]
    fn zlib_shrinks_repetitive_state() {
        let compressor = ZlibCompressor;
        let data = "dinosaurs ".repeat(100);
        let compressed = compressor.compress(data.as_bytes()).unwrap();
        assert!(compressed.len() < data.len());
    }

    #[test]
    fn zlib_rejects_garbage() {
        let compressor = ZlibCompressor;
        let result = compressor.decompress(b"definitely not zlib");
        assert!(matches!(result, Err(CompressionError::Decompress(_))));
    }
}
