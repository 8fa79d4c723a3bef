//! Compression adapter.
//!
//! Uniform `compress`/`decompress` over the small set of codecs the page codec
//! actually needs to reason about. Anything outside that set is rejected rather
//! than silently passed through, since a mis-identified codec would otherwise
//! corrupt level/value byte boundaries downstream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompressionError {
    #[error("unsupported compression codec: {0:?}")]
    Unsupported(CompressionCodec),
    #[error("snappy decode failed: {0}")]
    SnappyDecode(String),
    #[error("snappy encode failed: {0}")]
    SnappyEncode(String),
}

pub type Result<T> = std::result::Result<T, CompressionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionCodec {
    Uncompressed,
    Snappy,
    Other(u8),
}

impl CompressionCodec {
    pub fn from_name(name: &str) -> Self {
        match name {
            "UNCOMPRESSED" => CompressionCodec::Uncompressed,
            "SNAPPY" => CompressionCodec::Snappy,
            _ => CompressionCodec::Other(0),
        }
    }
}

/// Compresses `bytes` with `codec`. `UNCOMPRESSED` is a no-op; any codec other
/// than `UNCOMPRESSED`/`SNAPPY` is rejected.
pub fn compress(bytes: &[u8], codec: CompressionCodec) -> Result<Vec<u8>> {
    match codec {
        CompressionCodec::Uncompressed => Ok(bytes.to_vec()),
        CompressionCodec::Snappy => {
            if bytes.is_empty() {
                return Ok(Vec::new());
            }
            let mut encoder = snap::raw::Encoder::new();
            encoder.compress_vec(bytes).map_err(|e| {
                log::error!("snappy encode failed: {e}");
                CompressionError::SnappyEncode(e.to_string())
            })
        }
        other => {
            log::debug!("unsupported compression codec requested: {other:?}");
            Err(CompressionError::Unsupported(other))
        }
    }
}

/// Decompresses `bytes` previously produced by [`compress`] with the same codec.
pub fn decompress(bytes: &[u8], codec: CompressionCodec) -> Result<Vec<u8>> {
    match codec {
        CompressionCodec::Uncompressed => Ok(bytes.to_vec()),
        CompressionCodec::Snappy => {
            if bytes.is_empty() {
                return Ok(Vec::new());
            }
            let mut decoder = snap::raw::Decoder::new();
            decoder.decompress_vec(bytes).map_err(|e| {
                log::error!("snappy decode failed: {e}");
                CompressionError::SnappyDecode(e.to_string())
            })
        }
        other => Err(CompressionError::Unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_is_identity() {
        let data = b"hello world".to_vec();
        let compressed = compress(&data, CompressionCodec::Uncompressed).unwrap();
        assert_eq!(compressed, data);
        let decompressed = decompress(&compressed, CompressionCodec::Uncompressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn snappy_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = compress(&data, CompressionCodec::Snappy).unwrap();
        let decompressed = decompress(&compressed, CompressionCodec::Snappy).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn snappy_rejects_garbage() {
        let garbage = vec![0xffu8; 16];
        assert!(decompress(&garbage, CompressionCodec::Snappy).is_err());
    }

    #[test]
    fn empty_input_is_noop_for_both_codecs() {
        assert_eq!(compress(&[], CompressionCodec::Snappy).unwrap(), Vec::<u8>::new());
        assert_eq!(decompress(&[], CompressionCodec::Snappy).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn other_codec_is_rejected() {
        assert!(compress(b"x", CompressionCodec::Other(9)).is_err());
        assert!(decompress(b"x", CompressionCodec::Other(9)).is_err());
    }
}
