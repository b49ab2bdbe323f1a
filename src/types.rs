//! Core data types used throughout the chunkvault library
//!
//! This module contains fundamental data structures that are shared across
//! different components of the library.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Identity**: [`Fingerprint`] - the content address of a chunk
//! - **Configuration**: [`VaultConfig`] - store layout and tuning knobs
//! - **Operations**: [`StoreReport`], [`RetrieveReport`], [`RemovalReport`],
//!   [`GcStats`] - results of vault operations
//! - **Progress**: [`ProgressInfo`] - passed to progress callbacks
//!
//! ## Examples
//!
//! ```rust
//! use chunkvault::types::Fingerprint;
//!
//! let fp = Fingerprint::of(b"hello");
//! assert_eq!(fp.as_str().len(), 64);
//! assert_eq!(Fingerprint::parse(fp.as_str()).unwrap(), fp);
//! ```

use crate::chunker::ChunkerConfig;
use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Length of a rendered fingerprint (SHA-256 as lowercase hex)
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Content address of a chunk
///
/// A SHA-256 digest of the chunk's raw (pre-compression) bytes, rendered as
/// 64 lowercase hex characters. It doubles as the chunk's file name in the
/// chunk directory and serializes as a plain JSON string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of raw chunk bytes
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Parse a fingerprint from untrusted text
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidArgument`] unless the input is exactly
    /// 64 lowercase hexadecimal characters.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = s.len() == FINGERPRINT_HEX_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(Fingerprint(s.to_string()))
        } else {
            Err(VaultError::invalid_argument(format!("not a fingerprint: {:?}", s)))
        }
    }

    /// The full hex rendering
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self> {
        Fingerprint::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Configuration for a vault instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory that holds the chunk directory and the metadata record
    pub root: PathBuf,
    /// Chunk directory name, relative to `root`
    pub chunk_dir: String,
    /// Metadata record file name, relative to `root`
    pub metadata_file: String,
    /// Adaptive chunking parameters
    pub chunker: ChunkerConfig,
    /// zlib compression level (0-9)
    pub compression_level: u32,
    /// Chunks smaller than this are always stored raw
    pub min_compress_size: usize,
    /// Number of parallel workers for chunk writes
    pub parallel_workers: usize,
    /// Refuse to open a vault whose metadata record is unusable
    #[serde(default)]
    pub strict_metadata: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            chunk_dir: "chunks".to_string(),
            metadata_file: "metadata.json".to_string(),
            chunker: ChunkerConfig::default(),
            compression_level: 6,
            min_compress_size: 512,
            parallel_workers: num_cpus::get(),
            strict_metadata: false,
        }
    }
}

impl VaultConfig {
    /// Absolute (or root-relative) location of the chunk directory
    pub fn chunk_path(&self) -> PathBuf {
        self.root.join(&self.chunk_dir)
    }

    /// Absolute (or root-relative) location of the metadata record
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(&self.metadata_file)
    }

    /// Check configuration values for consistency
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(VaultError::invalid_argument(format!(
                "compression level {} is outside 0-9",
                self.compression_level
            )));
        }
        if self.min_compress_size > u32::MAX as usize {
            return Err(VaultError::invalid_argument("minimum compression size does not fit a frame header"));
        }
        if self.chunk_dir.is_empty() || self.metadata_file.is_empty() {
            return Err(VaultError::invalid_argument("store layout names must not be empty"));
        }
        self.chunker.validate()
    }
}

/// Result of storing one file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreReport {
    /// Logical path the file was stored under
    pub path: String,
    /// Size of the source file in bytes
    pub bytes_read: u64,
    /// Number of chunks the file was split into
    pub chunk_count: usize,
    /// Chunk objects newly written
    pub chunks_written: usize,
    /// Chunks that were already present in the store
    pub chunks_deduplicated: usize,
    /// Chunks whose object could not be written
    pub write_failures: usize,
    /// Base chunk size used by the chunker
    pub base_chunk_size: usize,
}

/// Result of reconstructing one file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveReport {
    /// Where the reconstructed file was written
    pub output: PathBuf,
    /// Chunks written to the output
    pub chunks_written: usize,
    /// Bytes written to the output
    pub bytes_written: u64,
    /// Chunks that were missing from the store and skipped
    pub missing_chunks: Vec<Fingerprint>,
    /// Chunks whose frame failed to decode
    pub degraded_chunks: Vec<Fingerprint>,
}

impl RetrieveReport {
    /// Whether every chunk was restored from a cleanly decoded frame
    pub fn is_complete(&self) -> bool {
        self.missing_chunks.is_empty() && self.degraded_chunks.is_empty()
    }
}

/// Result of removing a file from the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemovalReport {
    /// Logical path that was removed
    pub path: String,
    /// Chunk references released (with multiplicity)
    pub references_released: usize,
    /// Chunk objects deleted because their count reached zero
    pub chunks_deleted: usize,
}

/// Statistics from orphan garbage collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcStats {
    /// Number of chunk objects examined
    pub objects_examined: usize,
    /// Number of chunk objects deleted
    pub objects_deleted: usize,
    /// Bytes reclaimed
    pub bytes_reclaimed: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Chunk objects with no reference count entry
    pub unreferenced_objects: Vec<Fingerprint>,
}

/// Information passed to progress callbacks
#[derive(Debug, Clone, Copy)]
pub struct ProgressInfo {
    /// Units (bytes or chunks) processed so far
    pub processed: u64,
    /// Total units to process
    pub total: u64,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        if self.total == 0 {
            return None;
        }
        Some((self.processed as f32 / self.total as f32) * 100.0)
    }
}
