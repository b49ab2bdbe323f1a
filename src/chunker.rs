//! Adaptive chunking of file contents
//!
//! The chunker splits a byte stream of known length into an ordered sequence
//! of variable-length chunks. The target size of each chunk shrinks with the
//! share of the stream that is still unread:
//!
//! ```text
//! target = clamp(base * sqrt(remaining / total), MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
//! ```
//!
//! Early in a file chunks approach the base size (4 KiB by default); towards
//! the tail they get smaller, bottoming out at 1 KiB. Every chunk except the
//! last one is exactly its target size, and the concatenation of all chunks
//! reproduces the input byte for byte.
//!
//! ## Example
//!
//! ```rust
//! use chunkvault::chunker::{Chunker, ChunkerConfig};
//!
//! let data = vec![7u8; 20_000];
//! let chunks: Vec<Vec<u8>> = Chunker::new(&data[..], data.len() as u64, ChunkerConfig::default())
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//!
//! assert_eq!(chunks.concat(), data);
//! assert!(chunks.iter().all(|c| c.len() <= 8192));
//! ```

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::iter::FusedIterator;
use std::path::Path;
use tracing::{debug, trace};

/// Smallest target chunk size (1 KiB)
pub const MIN_CHUNK_SIZE: usize = 1024;
/// Largest target chunk size (8 KiB)
pub const MAX_CHUNK_SIZE: usize = 8192;
/// Default base chunk size (4 KiB)
pub const BASE_CHUNK_SIZE: usize = 4096;

/// Parameters of the adaptive size function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Lower clamp for the target size
    pub min_size: usize,
    /// Upper clamp for the target size
    pub max_size: usize,
    /// Target size at the start of a stream
    pub base_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: MIN_CHUNK_SIZE,
            max_size: MAX_CHUNK_SIZE,
            base_size: BASE_CHUNK_SIZE,
        }
    }
}

impl ChunkerConfig {
    /// Override the base size, clamped into `[min_size, max_size]`
    pub fn with_base_size(mut self, base_size: usize) -> Self {
        self.base_size = base_size.max(self.min_size).min(self.max_size);
        self
    }

    /// Check that the clamp bounds are usable
    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 || self.min_size > self.max_size {
            return Err(VaultError::invalid_argument(format!(
                "chunk size bounds [{}, {}] are invalid",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Target size of the next chunk given the unread share of the stream
    ///
    /// A zero-length stream has no meaningful ratio and gets the minimum.
    pub fn target_chunk_size(&self, remaining: u64, total: u64) -> usize {
        let ratio = if total == 0 {
            0.0
        } else {
            remaining as f64 / total as f64
        };
        let scaled = (self.base_size as f64 * ratio.sqrt()) as usize;
        scaled.max(self.min_size).min(self.max_size)
    }
}

/// Lazy, finite iterator over the chunks of a byte stream
///
/// Yields `Ok(chunk)` for every non-empty chunk in order. A read error is
/// yielded once as `Err` and the iterator then stays exhausted.
#[derive(Debug)]
pub struct Chunker<R> {
    reader: R,
    config: ChunkerConfig,
    total: u64,
    processed: u64,
    finished: bool,
}

impl Chunker<BufReader<File>> {
    /// Open a file for chunking
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the file cannot be opened or its length
    /// cannot be determined. No chunks are produced in that case.
    pub fn open(path: &Path, config: ChunkerConfig) -> Result<Self> {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        debug!("Chunking {:?} ({} bytes, base {} bytes)", path, total, config.base_size);
        Ok(Self::new(BufReader::new(file), total, config))
    }
}

impl<R: Read> Chunker<R> {
    /// Create a chunker over any reader whose total length is known
    pub fn new(reader: R, total: u64, config: ChunkerConfig) -> Self {
        Self {
            reader,
            config,
            total,
            processed: 0,
            finished: false,
        }
    }

    /// Total length the size function is computed against
    pub fn total_len(&self) -> u64 {
        self.total
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let remaining = self.total.saturating_sub(self.processed);
        let target = self.config.target_chunk_size(remaining, self.total);

        // take + read_to_end keeps reading across short reads until the
        // target is filled or the source is exhausted
        let mut buffer = Vec::with_capacity(target);
        if let Err(e) = (&mut self.reader).take(target as u64).read_to_end(&mut buffer) {
            self.finished = true;
            return Some(Err(VaultError::Io(e)));
        }

        if buffer.is_empty() {
            self.finished = true;
            return None;
        }
        if buffer.len() < target {
            self.finished = true;
        }

        self.processed += buffer.len() as u64;
        trace!("Chunk of {} bytes ({}/{})", buffer.len(), self.processed, self.total);
        Some(Ok(buffer))
    }
}

impl<R: Read> FusedIterator for Chunker<R> {}
