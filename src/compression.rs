//! Chunk frame encoding with zlib compression
//!
//! Every stored chunk is wrapped in a small self-describing frame:
//!
//! ```text
//! +----------------------+-------------------------------------+
//! | orig_size: u32 (LE)  | payload: raw bytes or zlib stream   |
//! +----------------------+-------------------------------------+
//! ```
//!
//! The header always records the original (pre-compression) length, and it
//! doubles as the discriminant when decoding: a frame whose length is exactly
//! `orig_size + 4` carries its payload raw, anything else is a compressed
//! stream. Compression is only kept when it is strictly smaller than the
//! input, so a compressed frame can never be mistaken for a raw one.
//!
//! Chunks smaller than [`MIN_COMPRESS_SIZE`] are always stored raw.
//!
//! ## Decoding failures
//!
//! A frame that fails to inflate, or inflates to the wrong length, is not an
//! error: decoding yields [`DecodeResult::Degraded`] carrying the frame bytes
//! unmodified, and a warning is logged. Callers decide whether degraded data
//! is usable.
//!
//! ## Examples
//!
//! ```rust
//! use chunkvault::compression::{CompressionEngine, DecodeResult};
//!
//! let engine = CompressionEngine::default();
//! let chunk = vec![0u8; 10_000];
//! let frame = engine.encode(&chunk).unwrap();
//! assert!(frame.len() < chunk.len());
//!
//! match engine.decode(&frame) {
//!     DecodeResult::Decoded(bytes) => assert_eq!(bytes, chunk),
//!     DecodeResult::Degraded(_) => unreachable!(),
//! }
//! ```

use crate::error::{Result, VaultError};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::io::{Read, Write};
use tracing::{trace, warn};

/// Size of the original-length header
pub const FRAME_HEADER_LEN: usize = 4;

/// Chunks below this size skip compression entirely
pub const MIN_COMPRESS_SIZE: usize = 512;

// Headers come from disk and may be damaged
const MAX_CAPACITY_HINT: usize = 1 << 20;

/// Outcome of decoding a stored frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// The exact original bytes
    Decoded(Vec<u8>),
    /// Decoding failed; the frame bytes are returned unmodified
    Degraded(Vec<u8>),
}

impl DecodeResult {
    /// Whether decoding fell back to raw frame bytes
    pub fn is_degraded(&self) -> bool {
        matches!(self, DecodeResult::Degraded(_))
    }

    /// Borrow the payload regardless of outcome
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DecodeResult::Decoded(bytes) | DecodeResult::Degraded(bytes) => bytes,
        }
    }

    /// The decoded bytes, or a corruption error if decoding degraded
    pub fn into_decoded(self) -> Result<Vec<u8>> {
        match self {
            DecodeResult::Decoded(bytes) => Ok(bytes),
            DecodeResult::Degraded(bytes) => Err(VaultError::corrupt(format!(
                "frame of {} bytes failed to decode",
                bytes.len()
            ))),
        }
    }
}

/// Compression statistics for monitoring
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompressionStats {
    /// Frames written with a compressed payload
    pub frames_compressed: usize,
    /// Frames written with a raw payload
    pub frames_stored_raw: usize,
    /// Bytes saved by compression
    pub bytes_saved: usize,
    /// Frames decoded cleanly
    pub frames_decoded: usize,
    /// Frames that failed to decode
    pub frames_degraded: usize,
}

impl CompressionStats {
    /// Share of encoded frames that were compressed (0.0 to 1.0)
    pub fn compression_ratio(&self) -> f64 {
        let total = self.frames_compressed + self.frames_stored_raw;
        if total == 0 {
            return 0.0;
        }
        self.frames_compressed as f64 / total as f64
    }
}

/// Frame encoder/decoder
///
/// Encoding and decoding take `&self`, so one engine can be shared across
/// rayon workers; statistics are kept behind a mutex.
#[derive(Debug)]
pub struct CompressionEngine {
    level: Compression,
    min_size: usize,
    stats: Mutex<CompressionStats>,
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::new(6, MIN_COMPRESS_SIZE)
    }
}

impl CompressionEngine {
    /// Create an engine with a zlib level (0-9, clamped) and a raw-size threshold
    pub fn new(level: u32, min_size: usize) -> Self {
        Self {
            level: Compression::new(level.min(9)),
            min_size,
            stats: Mutex::new(CompressionStats::default()),
        }
    }

    /// Snapshot of the statistics since creation or last reset
    pub fn stats(&self) -> CompressionStats {
        self.stats.lock().clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        *self.stats.lock() = CompressionStats::default();
    }

    /// Encode a chunk into a frame
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidArgument`] if the chunk is too large for
    /// the 32-bit size header. Compression failures are not errors; they fall
    /// back to a raw frame.
    pub fn encode(&self, content: &[u8]) -> Result<Vec<u8>> {
        let orig_size = u32::try_from(content.len()).map_err(|_| {
            VaultError::invalid_argument(format!("chunk of {} bytes exceeds frame limit", content.len()))
        })?;

        if content.len() >= self.min_size {
            match self.deflate(content) {
                Ok(compressed) if compressed.len() < content.len() => {
                    let mut stats = self.stats.lock();
                    stats.frames_compressed += 1;
                    stats.bytes_saved += content.len() - compressed.len();
                    drop(stats);

                    trace!("Compressed chunk: {} -> {} bytes", content.len(), compressed.len());
                    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + compressed.len());
                    frame.extend_from_slice(&orig_size.to_le_bytes());
                    frame.extend_from_slice(&compressed);
                    return Ok(frame);
                }
                Ok(_) => trace!("Compression not beneficial for {} byte chunk", content.len()),
                Err(e) => warn!("Compression failed, storing raw: {}", e),
            }
        }

        self.stats.lock().frames_stored_raw += 1;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + content.len());
        frame.extend_from_slice(&orig_size.to_le_bytes());
        frame.extend_from_slice(content);
        Ok(frame)
    }

    /// Decode a frame back into the original chunk
    pub fn decode(&self, frame: &[u8]) -> DecodeResult {
        let Some(orig_size) = frame_original_size(frame) else {
            warn!("Frame too small ({} bytes), returning raw data", frame.len());
            self.stats.lock().frames_degraded += 1;
            return DecodeResult::Degraded(frame.to_vec());
        };
        let orig_size = orig_size as usize;
        let payload = &frame[FRAME_HEADER_LEN..];

        if payload.len() == orig_size {
            self.stats.lock().frames_decoded += 1;
            return DecodeResult::Decoded(payload.to_vec());
        }

        // One byte of slack detects streams that inflate past the header size
        let mut decoded = Vec::with_capacity(orig_size.min(MAX_CAPACITY_HINT));
        let inflated = ZlibDecoder::new(payload)
            .take(orig_size as u64 + 1)
            .read_to_end(&mut decoded);

        match inflated {
            Ok(n) if n == orig_size => {
                self.stats.lock().frames_decoded += 1;
                DecodeResult::Decoded(decoded)
            }
            Ok(n) => {
                warn!("Decompression produced {} bytes, expected {}; returning raw data", n, orig_size);
                self.stats.lock().frames_degraded += 1;
                DecodeResult::Degraded(frame.to_vec())
            }
            Err(e) => {
                warn!("Decompression failed ({}), returning raw data", e);
                self.stats.lock().frames_degraded += 1;
                DecodeResult::Degraded(frame.to_vec())
            }
        }
    }

    fn deflate(&self, content: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(content.len() / 2), self.level);
        encoder.write_all(content)?;
        encoder.finish()
    }
}

/// Original chunk length recorded in a frame header
pub fn frame_original_size(frame: &[u8]) -> Option<u32> {
    let header: [u8; FRAME_HEADER_LEN] = frame.get(..FRAME_HEADER_LEN)?.try_into().ok()?;
    Some(u32::from_le_bytes(header))
}

/// Whether a frame carries its payload uncompressed
pub fn is_raw_frame(frame: &[u8]) -> bool {
    frame_original_size(frame)
        .map(|orig| frame.len() == orig as usize + FRAME_HEADER_LEN)
        .unwrap_or(false)
}
