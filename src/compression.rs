//! Transparent gzip compression for outbound request bodies.
//!
//! Bodies sent to targets with `use_compression` enabled are gzipped once
//! they pass the configured size threshold and tagged with
//! `Content-Encoding: gzip`. Output is deterministic for a fixed level
//! because the gzip header carries no timestamp.
//!
//! # Example
//!
//! ```
//! use event_sync_engine::compression::{compress, decompress, is_compressed};
//!
//! let body = br#"{"batch":[{"event_type":"metric"}],"batch_size":1}"#;
//! let packed = compress(body).unwrap();
//! assert!(is_compressed(&packed));
//! assert_eq!(decompress(&packed).unwrap(), body);
//! ```

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzip magic bytes (RFC 1952)
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default compression level (6 is zlib's speed/ratio balance)
const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Compression error types
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// Failed to compress data
    #[error("compression failed: {0}")]
    CompressFailed(String),

    /// Failed to decompress data
    #[error("decompression failed: {0}")]
    DecompressFailed(String),
}

/// Check if data is gzip-compressed by checking magic bytes.
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// Gzip bytes with the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    compress_with_level(data, DEFAULT_COMPRESSION_LEVEL)
}

/// Gzip bytes with a custom level (0-9).
///
/// - Level 1-3: Fast, good for real-time
/// - Level 6: Balanced
/// - Level 9: Maximum compression, slow
pub fn compress_with_level(data: &[u8], level: u32) -> Result<Vec<u8>, CompressionError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .map_err(|e| CompressionError::CompressFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CompressionError::CompressFailed(e.to_string()))
}

/// Inflate gzip bytes.
///
/// Data without the gzip magic header is returned as-is.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    if !is_compressed(data) {
        return Ok(data.to_vec());
    }
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
    Ok(out)
}

/// Compression statistics for a single operation.
#[derive(Debug, Clone, Copy)]
pub struct CompressionStats {
    /// Original size in bytes
    pub original_bytes: usize,
    /// Compressed size in bytes
    pub compressed_bytes: usize,
    /// Compression ratio (original / compressed)
    pub ratio: f64,
    /// Space saved as percentage (0.0 - 1.0)
    pub savings: f64,
}

impl CompressionStats {
    /// Calculate stats from original and compressed sizes.
    #[must_use]
    pub fn new(original_bytes: usize, compressed_bytes: usize) -> Self {
        let ratio = if compressed_bytes > 0 {
            original_bytes as f64 / compressed_bytes as f64
        } else {
            0.0
        };
        let savings = if original_bytes > 0 {
            1.0 - (compressed_bytes as f64 / original_bytes as f64)
        } else {
            0.0
        };
        Self {
            original_bytes,
            compressed_bytes,
            ratio,
            savings,
        }
    }
}

/// Compress bytes and return stats.
pub fn compress_with_stats(data: &[u8]) -> Result<(Vec<u8>, CompressionStats), CompressionError> {
    let compressed = compress(data)?;
    let stats = CompressionStats::new(data.len(), compressed.len());
    Ok((compressed, stats))
}
