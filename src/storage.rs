//! Content-addressed chunk store
//!
//! This module provides the chunk store for chunkvault: every unique chunk is
//! written exactly once, framed and compressed, under a file named after its
//! fingerprint.
//!
//! ## Layout
//!
//! ```text
//! root/
//! ├── metadata.json          # Metadata index (owned by MetadataIndex)
//! └── chunks/                # One object per unique chunk
//!     └── <fingerprint>      # 64 lowercase hex chars, frame contents
//! ```
//!
//! ## Deduplication
//!
//! Before writing, the store checks whether an object already exists under
//! the chunk's fingerprint and skips the write if so. New objects are written
//! to a temporary file in the chunk directory and moved into place with a
//! no-clobber persist, so a reader never observes a partially written frame
//! and two writers racing on the same fingerprint leave exactly one intact
//! object behind.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use chunkvault::storage::ChunkStore;
//! use chunkvault::compression::CompressionEngine;
//! use std::path::PathBuf;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ChunkStore::new(PathBuf::from("./chunks"), CompressionEngine::default(), 1);
//!
//! let batch = store.store(&[b"hello".to_vec(), b"hello".to_vec()]);
//! assert_eq!(batch.fingerprints[0], batch.fingerprints[1]);
//! assert_eq!(batch.written, 1);
//!
//! let bytes = store.load(&batch.fingerprints[0])?.into_decoded()?;
//! assert_eq!(bytes, b"hello");
//! # Ok(())
//! # }
//! ```

use crate::compression::{CompressionEngine, DecodeResult};
use crate::error::{Result, VaultError};
use crate::types::Fingerprint;
use rayon::prelude::*;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::NamedTempFile;
use tracing::{debug, error, trace, warn};

/// What happened to a single chunk during a store batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    AlreadyPresent,
    Failed,
}

/// Result of storing a batch of chunks
#[derive(Debug, Clone, Default)]
pub struct StoreBatch {
    /// Fingerprints in input order, duplicates included
    pub fingerprints: Vec<Fingerprint>,
    /// Objects newly written by this batch
    pub written: usize,
    /// Chunks whose object already existed
    pub deduplicated: usize,
    /// Chunks whose object could not be written
    pub failed: usize,
}

/// Content-addressed store of framed chunk objects
#[derive(Debug)]
pub struct ChunkStore {
    /// Directory holding one file per fingerprint
    dir: PathBuf,
    /// Frame encoder/decoder
    compression: CompressionEngine,
    /// Requested worker count
    workers: usize,
    /// Worker pool, built on first use (`None` = sequential)
    pool: OnceLock<Option<rayon::ThreadPool>>,
}

impl ChunkStore {
    /// Create a store rooted at `dir`
    ///
    /// The directory is created lazily on the first write, the worker pool
    /// on the first parallel batch.
    pub fn new(dir: PathBuf, compression: CompressionEngine, parallel_workers: usize) -> Self {
        Self {
            dir,
            compression,
            workers: parallel_workers.max(1),
            pool: OnceLock::new(),
        }
    }

    /// Number of workers requested for parallel work
    pub fn parallel_workers(&self) -> usize {
        self.workers
    }

    /// Worker pool shared by batch writes and verification
    ///
    /// `None` when a single worker was requested or the pool could not be
    /// built; callers then run sequentially.
    pub fn worker_pool(&self) -> Option<&rayon::ThreadPool> {
        self.pool
            .get_or_init(|| {
                if self.workers <= 1 {
                    return None;
                }
                match rayon::ThreadPoolBuilder::new().num_threads(self.workers).build() {
                    Ok(pool) => {
                        debug!("Started {} chunk workers", self.workers);
                        Some(pool)
                    }
                    Err(e) => {
                        warn!("Falling back to sequential chunk processing: {}", e);
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Whether the worker pool has been started
    pub fn pool_started(&self) -> bool {
        self.pool.get().is_some_and(Option::is_some)
    }

    /// Chunk directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Frame encoder/decoder used by this store
    pub fn compression(&self) -> &CompressionEngine {
        &self.compression
    }

    /// Compute the fingerprint of a chunk
    pub fn hash(content: &[u8]) -> Fingerprint {
        Fingerprint::of(content)
    }

    /// Store a batch of chunks, deduplicating against existing objects
    ///
    /// Returns one fingerprint per input chunk, in input order. A chunk whose
    /// object cannot be written is logged and counted in
    /// [`StoreBatch::failed`]; its fingerprint is still returned and the rest
    /// of the batch proceeds.
    pub fn store(&self, chunks: &[Vec<u8>]) -> StoreBatch {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            error!("Cannot create chunk directory {:?}: {}", self.dir, e);
        }

        let pool = if chunks.len() > 1 { self.worker_pool() } else { None };
        let outcomes: Vec<(Fingerprint, WriteOutcome)> = match pool {
            Some(pool) => pool.install(|| chunks.par_iter().map(|c| self.store_one(c)).collect()),
            None => chunks.iter().map(|c| self.store_one(c)).collect(),
        };

        let mut batch = StoreBatch {
            fingerprints: Vec::with_capacity(outcomes.len()),
            ..Default::default()
        };
        for (fingerprint, outcome) in outcomes {
            match outcome {
                WriteOutcome::Written => batch.written += 1,
                WriteOutcome::AlreadyPresent => batch.deduplicated += 1,
                WriteOutcome::Failed => batch.failed += 1,
            }
            batch.fingerprints.push(fingerprint);
        }

        debug!(
            "Stored {} chunks: {} written, {} deduplicated, {} failed",
            batch.fingerprints.len(),
            batch.written,
            batch.deduplicated,
            batch.failed
        );
        batch
    }

    fn store_one(&self, content: &[u8]) -> (Fingerprint, WriteOutcome) {
        let fingerprint = Self::hash(content);
        if self.contains(&fingerprint) {
            trace!("Chunk {} already exists", fingerprint.short());
            return (fingerprint, WriteOutcome::AlreadyPresent);
        }

        let outcome = match self.write_object(&fingerprint, content) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Cannot write chunk {}: {}", fingerprint, e);
                WriteOutcome::Failed
            }
        };
        (fingerprint, outcome)
    }

    fn write_object(&self, fingerprint: &Fingerprint, content: &[u8]) -> Result<WriteOutcome> {
        let frame = self.compression.encode(content)?;

        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(&frame)?;
        temp.as_file().sync_all()?;

        match temp.persist_noclobber(self.object_path(fingerprint)) {
            Ok(_) => {
                trace!("Wrote chunk {} ({} -> {} bytes)", fingerprint.short(), content.len(), frame.len());
                Ok(WriteOutcome::Written)
            }
            // Another writer got there first with identical content
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(WriteOutcome::AlreadyPresent),
            Err(e) => Err(VaultError::Io(e.error)),
        }
    }

    /// Load and decode a chunk
    ///
    /// # Errors
    ///
    /// - [`VaultError::ChunkNotFound`] if no object exists for the fingerprint
    /// - [`VaultError::Io`] if the object cannot be read
    ///
    /// A frame that fails to decode is returned as [`DecodeResult::Degraded`].
    pub fn load(&self, fingerprint: &Fingerprint) -> Result<DecodeResult> {
        let frame = self.read_frame(fingerprint)?;
        let result = self.compression.decode(&frame);
        if result.is_degraded() {
            warn!("Chunk {} is corrupt", fingerprint.short());
        } else {
            trace!("Loaded chunk {} ({} bytes)", fingerprint.short(), result.as_bytes().len());
        }
        Ok(result)
    }

    /// Read the raw stored frame of a chunk
    pub fn read_frame(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>> {
        match fs::read(self.object_path(fingerprint)) {
            Ok(frame) => Ok(frame),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(VaultError::ChunkNotFound(fingerprint.to_string()))
            }
            Err(e) => Err(VaultError::Io(e)),
        }
    }

    /// Check if a chunk object exists
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.object_path(fingerprint).is_file()
    }

    /// Delete a chunk object; absent objects are ignored
    pub fn delete(&self, fingerprint: &Fingerprint) -> Result<()> {
        match fs::remove_file(self.object_path(fingerprint)) {
            Ok(()) => {
                debug!("Deleted chunk {}", fingerprint.short());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::Io(e)),
        }
    }

    /// Stored (compressed) size of a chunk object
    pub fn size_of(&self, fingerprint: &Fingerprint) -> Option<u64> {
        fs::metadata(self.object_path(fingerprint))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    /// List every chunk object in the store
    ///
    /// Files whose names are not fingerprints (such as leftover temporary
    /// files) are skipped.
    pub fn list_chunks(&self) -> Result<Vec<Fingerprint>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::Io(e)),
        };

        let mut chunks = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(Fingerprint::parse) {
                Some(Ok(fingerprint)) => chunks.push(fingerprint),
                _ => trace!("Ignoring foreign file {:?} in chunk directory", name),
            }
        }
        chunks.sort();
        Ok(chunks)
    }

    fn object_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(fingerprint.as_str())
    }
}
