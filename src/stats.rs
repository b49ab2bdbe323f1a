//! Store statistics for the `list` report
//!
//! Everything here is read-only: statistics are computed from the metadata
//! index and the chunk objects it references, and nothing is modified.
//!
//! Per file, the stored size is the sum of the chunk object sizes it
//! references (with multiplicity) and the original size is obtained by
//! decoding those chunks. Store-wide, physical bytes count every unique
//! chunk object once, so the difference to the logical bytes is what
//! deduplication and compression saved together.

use crate::compression::{frame_original_size, DecodeResult};
use crate::index::MetadataIndex;
use crate::storage::ChunkStore;
use crate::types::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Statistics for one stored file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    /// Logical path
    pub path: String,
    /// Number of chunk references
    pub chunk_count: usize,
    /// Sum of the stored (compressed) sizes of the referenced chunks
    pub stored_bytes: u64,
    /// Sum of the original sizes of the referenced chunks
    pub original_bytes: u64,
    /// References whose chunk object is missing
    pub missing_chunks: usize,
    /// References whose chunk object failed to decode
    pub degraded_chunks: usize,
}

impl FileStats {
    /// Mean original chunk size in bytes
    pub fn average_chunk_size(&self) -> f64 {
        if self.chunk_count == 0 {
            0.0
        } else {
            self.original_bytes as f64 / self.chunk_count as f64
        }
    }

    /// Space saved by compression, in percent of the original size
    pub fn savings_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            0.0
        } else {
            100.0 * (1.0 - self.stored_bytes as f64 / self.original_bytes as f64)
        }
    }
}

/// Statistics for the whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Per-file statistics, largest original size first
    pub files: Vec<FileStats>,
    /// Number of distinct fingerprints referenced by any file
    pub unique_chunks: usize,
    /// Sum of original file sizes
    pub logical_bytes: u64,
    /// Sum of chunk object sizes, each unique chunk counted once
    pub physical_bytes: u64,
}

impl StoreStats {
    /// Number of stored files
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Whether the store holds no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Bytes saved by deduplication and compression combined
    pub fn savings(&self) -> i64 {
        self.logical_bytes as i64 - self.physical_bytes as i64
    }

    /// Combined savings in percent of the logical size
    pub fn savings_percent(&self) -> f64 {
        if self.logical_bytes == 0 {
            0.0
        } else {
            100.0 * self.savings() as f64 / self.logical_bytes as f64
        }
    }
}

/// Per-chunk facts, computed once per fingerprint
#[derive(Clone, Copy)]
enum ChunkFacts {
    Missing,
    Present { stored: u64, original: u64, degraded: bool },
}

fn inspect_chunk(store: &ChunkStore, fingerprint: &Fingerprint) -> ChunkFacts {
    let Some(stored) = store.size_of(fingerprint) else {
        return ChunkFacts::Missing;
    };

    match store.load(fingerprint) {
        Ok(DecodeResult::Decoded(bytes)) => ChunkFacts::Present {
            stored,
            original: bytes.len() as u64,
            degraded: false,
        },
        Ok(DecodeResult::Degraded(frame)) => {
            let original = frame_original_size(&frame)
                .map(u64::from)
                .unwrap_or(frame.len() as u64);
            ChunkFacts::Present { stored, original, degraded: true }
        }
        Err(e) => {
            warn!("Cannot read chunk {}: {}", fingerprint.short(), e);
            ChunkFacts::Missing
        }
    }
}

/// Compute statistics for every file in the index
pub fn collect(index: &MetadataIndex, store: &ChunkStore) -> StoreStats {
    let mut facts: HashMap<&Fingerprint, ChunkFacts> = HashMap::new();
    let mut stats = StoreStats::default();

    for (path, fingerprints) in index.files() {
        let mut file = FileStats {
            path: path.to_string(),
            chunk_count: fingerprints.len(),
            stored_bytes: 0,
            original_bytes: 0,
            missing_chunks: 0,
            degraded_chunks: 0,
        };

        for fingerprint in fingerprints {
            let chunk = *facts
                .entry(fingerprint)
                .or_insert_with(|| inspect_chunk(store, fingerprint));
            match chunk {
                ChunkFacts::Missing => file.missing_chunks += 1,
                ChunkFacts::Present { stored, original, degraded } => {
                    file.stored_bytes += stored;
                    file.original_bytes += original;
                    if degraded {
                        file.degraded_chunks += 1;
                    }
                }
            }
        }

        stats.logical_bytes += file.original_bytes;
        stats.files.push(file);
    }

    stats.unique_chunks = facts.len();
    stats.physical_bytes = facts
        .values()
        .map(|chunk| match chunk {
            ChunkFacts::Present { stored, .. } => *stored,
            ChunkFacts::Missing => 0,
        })
        .sum();

    // Stable sort keeps path order among equal sizes
    stats.files.sort_by(|a, b| b.original_bytes.cmp(&a.original_bytes));

    debug!(
        "Collected stats: {} files, {} unique chunks, {} logical bytes, {} physical bytes",
        stats.file_count(),
        stats.unique_chunks,
        stats.logical_bytes,
        stats.physical_bytes
    );
    stats
}
