//! Main vault implementation
//!
//! [`Vault`] is the entry point for all operations. It owns the chunk store
//! and the metadata index and wires them together:
//!
//! - **store**: chunk a file, persist unique chunks, record the sequence
//! - **retrieve**: reconstruct a file from its recorded chunk sequence
//! - **delete**: drop a file and garbage-collect unreferenced chunks
//! - **list**: per-file and store-wide statistics
//! - **gc** / **verify**: sweep orphaned chunk objects, check consistency
//!
//! ## Examples
//!
//! ```rust,no_run
//! use chunkvault::Vault;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut vault = Vault::open("./backup")?;
//!
//! let report = vault.store_file(Path::new("report.pdf"))?;
//! println!("{} chunks, {} new", report.chunk_count, report.chunks_written);
//!
//! let restored = vault.retrieve_file("report.pdf")?;
//! println!("Restored to {}", restored.output.display());
//!
//! vault.delete_file("report.pdf")?;
//! # Ok(())
//! # }
//! ```
//!
//! A vault is meant for one process at a time. Chunk writes within a single
//! store operation run in parallel; everything else is sequential.

use crate::chunker::{Chunker, ChunkerConfig};
use crate::compression::{frame_original_size, CompressionEngine, DecodeResult};
use crate::error::{Result, VaultError};
use crate::index::{IndexOrigin, MetadataIndex};
use crate::stats::{self, StoreStats};
use crate::storage::ChunkStore;
use crate::types::*;
use crate::verification::{VaultVerifier, VerificationReport};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, trace, warn};

/// Chunks handed to the store per batch while reading a file
const STORE_BATCH_CHUNKS: usize = 256;

/// Prefix of reconstructed file names
pub const RETRIEVED_PREFIX: &str = "retrieved_";

/// A deduplicating chunk vault rooted at one directory
#[derive(Debug)]
pub struct Vault {
    /// Configuration
    config: VaultConfig,
    /// Chunk objects
    store: ChunkStore,
    /// File entries and reference counts
    index: MetadataIndex,
}

impl Vault {
    /// Open the vault at `root` with default settings
    ///
    /// Nothing is created on disk until the first store.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if an existing metadata record cannot be
    /// read. A corrupt record is not an error; see [`MetadataIndex::load`].
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        VaultBuilder::new().build(root)
    }

    /// Open a vault from a full configuration
    #[instrument(skip(config), fields(root = ?config.root))]
    pub fn with_config(config: VaultConfig) -> Result<Self> {
        config.validate()?;

        let compression = CompressionEngine::new(config.compression_level, config.min_compress_size);
        let store = ChunkStore::new(config.chunk_path(), compression, config.parallel_workers);
        let index = if config.strict_metadata {
            MetadataIndex::load_strict(config.metadata_path())?
        } else {
            MetadataIndex::load(config.metadata_path())?
        };

        debug!(
            "Opened vault at {:?}: {} files, {} unique chunks ({:?})",
            config.root,
            index.file_count(),
            index.unique_chunk_count(),
            index.origin()
        );
        Ok(Self { config, store, index })
    }

    /// Configuration in effect
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// The metadata index
    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    /// The chunk store
    pub fn chunk_store(&self) -> &ChunkStore {
        &self.store
    }

    /// Store a file under its path as given
    pub fn store_file(&mut self, source: &Path) -> Result<StoreReport> {
        self.store_file_with_progress::<fn(ProgressInfo)>(source, None)
    }

    /// Store a file, reporting bytes read through `progress`
    ///
    /// The file is recorded under `source` as given. Storing a path that is
    /// already recorded replaces its entry; the chunks of the previous entry
    /// keep their references.
    ///
    /// An empty file is recorded with no chunks.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidArgument`] if `source` is not valid UTF-8; it
    ///   could not be recorded as an exact key
    /// - [`VaultError::Io`] if the source cannot be opened or read; chunks
    ///   written before a mid-file read error are left for [`Vault::gc`]
    /// - [`VaultError::Io`] if the index cannot be saved
    #[instrument(skip(self, progress))]
    pub fn store_file_with_progress<F>(&mut self, source: &Path, mut progress: Option<F>) -> Result<StoreReport>
    where
        F: FnMut(ProgressInfo),
    {
        let start = Instant::now();
        let key = source
            .to_str()
            .ok_or_else(|| VaultError::invalid_argument(format!("{:?} is not a valid UTF-8 path", source)))?
            .to_string();

        let mut chunker = Chunker::open(source, self.config.chunker)?;
        let total = chunker.total_len();

        let mut report = StoreReport {
            path: key.clone(),
            base_chunk_size: self.config.chunker.base_size,
            ..Default::default()
        };
        let mut fingerprints = Vec::new();
        let mut pending: Vec<Vec<u8>> = Vec::with_capacity(STORE_BATCH_CHUNKS);

        loop {
            let next = chunker.next().transpose()?;
            let done = next.is_none();
            if let Some(chunk) = next {
                report.bytes_read += chunk.len() as u64;
                pending.push(chunk);
            }

            if pending.len() >= STORE_BATCH_CHUNKS || (done && !pending.is_empty()) {
                let batch = self.store.store(&pending);
                report.chunks_written += batch.written;
                report.chunks_deduplicated += batch.deduplicated;
                report.write_failures += batch.failed;
                fingerprints.extend(batch.fingerprints);
                pending.clear();

                if let Some(ref mut callback) = progress {
                    callback(ProgressInfo {
                        processed: report.bytes_read,
                        total,
                    });
                }
            }

            if done {
                break;
            }
        }

        report.chunk_count = fingerprints.len();
        if report.write_failures > 0 {
            warn!(
                "{} of {} chunks of {} could not be written",
                report.write_failures, report.chunk_count, key
            );
        }

        self.index.add_file(key.clone(), fingerprints);
        self.index.save()?;

        info!(
            "Stored {} in {}ms: {} bytes, {} chunks ({} new, {} deduplicated)",
            key,
            start.elapsed().as_millis(),
            report.bytes_read,
            report.chunk_count,
            report.chunks_written,
            report.chunks_deduplicated
        );
        Ok(report)
    }

    /// Default output location for a retrieved file
    ///
    /// `dir/name` is reconstructed to `dir/retrieved_name`.
    pub fn default_output_path(path: &str) -> Result<PathBuf> {
        let path = Path::new(path);
        let name = path
            .file_name()
            .ok_or_else(|| VaultError::invalid_argument(format!("{:?} does not name a file", path)))?;

        let mut output_name = std::ffi::OsString::from(RETRIEVED_PREFIX);
        output_name.push(name);
        Ok(path.with_file_name(output_name))
    }

    /// Reconstruct a file to its default output location
    pub fn retrieve_file(&self, path: &str) -> Result<RetrieveReport> {
        let output = Self::default_output_path(path)?;
        self.retrieve_file_to(path, &output)
    }

    /// Reconstruct a file to `output`
    pub fn retrieve_file_to(&self, path: &str, output: &Path) -> Result<RetrieveReport> {
        self.retrieve_file_with_progress::<fn(ProgressInfo)>(path, output, None)
    }

    /// Reconstruct a file, reporting chunks processed through `progress`
    ///
    /// Missing chunks are skipped with a warning. A chunk whose frame fails
    /// to decode is written as stored only if its length matches the length
    /// recorded in the frame header, and skipped otherwise. Both cases are
    /// listed in the returned report.
    ///
    /// The output is written to a temporary file next to it and renamed into
    /// place at the end.
    ///
    /// # Errors
    ///
    /// - [`VaultError::FileNotFound`] if `path` is not recorded
    /// - [`VaultError::Io`] if the output cannot be written
    #[instrument(skip(self, progress))]
    pub fn retrieve_file_with_progress<F>(
        &self,
        path: &str,
        output: &Path,
        mut progress: Option<F>,
    ) -> Result<RetrieveReport>
    where
        F: FnMut(ProgressInfo),
    {
        if !self.index.contains(path) {
            return Err(VaultError::FileNotFound(path.to_string()));
        }
        let fingerprints = self.index.get_chunks(path);
        let total = fingerprints.len() as u64;

        let output_dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut writer = BufWriter::new(NamedTempFile::new_in(output_dir)?);

        let mut report = RetrieveReport {
            output: output.to_path_buf(),
            ..Default::default()
        };

        for (i, fingerprint) in fingerprints.iter().enumerate() {
            match self.store.load(fingerprint) {
                Ok(DecodeResult::Decoded(bytes)) => {
                    writer.write_all(&bytes)?;
                    report.chunks_written += 1;
                    report.bytes_written += bytes.len() as u64;
                }
                Ok(DecodeResult::Degraded(frame)) => {
                    let declared = frame_original_size(&frame).map(u64::from);
                    if declared == Some(frame.len() as u64) {
                        warn!("Writing chunk {} undecoded", fingerprint.short());
                        writer.write_all(&frame)?;
                        report.chunks_written += 1;
                        report.bytes_written += frame.len() as u64;
                    } else {
                        warn!("Skipping undecodable chunk {}", fingerprint.short());
                    }
                    report.degraded_chunks.push(fingerprint.clone());
                }
                Err(e) => {
                    warn!("Skipping chunk {}: {}", fingerprint.short(), e);
                    report.missing_chunks.push(fingerprint.clone());
                }
            }

            if let Some(ref mut callback) = progress {
                callback(ProgressInfo {
                    processed: i as u64 + 1,
                    total,
                });
            }
        }

        let temp = writer.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(output).map_err(|e| e.error)?;

        if report.is_complete() {
            info!("Retrieved {} to {:?} ({} bytes)", path, output, report.bytes_written);
        } else {
            warn!(
                "Retrieved {} to {:?} with {} missing and {} damaged chunks",
                path,
                output,
                report.missing_chunks.len(),
                report.degraded_chunks.len()
            );
        }
        Ok(report)
    }

    /// Remove a file and delete chunks no other file references
    ///
    /// # Errors
    ///
    /// - [`VaultError::FileNotFound`] if `path` is not recorded; nothing is
    ///   changed
    /// - [`VaultError::Io`] if the index cannot be saved
    #[instrument(skip(self))]
    pub fn delete_file(&mut self, path: &str) -> Result<RemovalReport> {
        self.index.remove_file(path, &self.store)
    }

    /// Recorded file paths in order
    pub fn list_files(&self) -> Vec<String> {
        self.index.files().map(|(path, _)| path.to_string()).collect()
    }

    /// Whether a file path is recorded
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains(path)
    }

    /// Per-file and store-wide statistics
    #[instrument(skip(self))]
    pub fn stats(&self) -> StoreStats {
        stats::collect(&self.index, &self.store)
    }

    /// Delete chunk objects that have no reference count entry
    ///
    /// Such objects are left behind when a store is interrupted between
    /// writing chunks and saving the index.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::CorruptData`] if the index was reset after a
    /// failed load, since every object would look unreferenced.
    #[instrument(skip(self))]
    pub fn gc(&self) -> Result<GcStats> {
        if let IndexOrigin::Recovered(failure) = self.index.origin() {
            return Err(VaultError::corrupt(format!(
                "metadata was reset after a load failure ({:?}); refusing to collect chunk objects",
                failure
            )));
        }

        info!("Starting garbage collection");
        let start = Instant::now();
        let mut stats = self.find_unreferenced()?;

        for fingerprint in &stats.unreferenced_objects {
            let size = self.store.size_of(fingerprint).unwrap_or(0);
            match self.store.delete(fingerprint) {
                Ok(()) => {
                    stats.objects_deleted += 1;
                    stats.bytes_reclaimed += size;
                }
                Err(e) => warn!("Failed to delete object {}: {}", fingerprint.short(), e),
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Garbage collection complete in {}ms: {} objects deleted, {} bytes reclaimed",
            stats.duration_ms, stats.objects_deleted, stats.bytes_reclaimed
        );
        Ok(stats)
    }

    /// Analyze garbage collection without actually deleting anything
    #[instrument(skip(self))]
    pub fn gc_analyze(&self) -> Result<GcStats> {
        info!("Analyzing garbage collection (dry run)");
        let start = Instant::now();
        let mut stats = self.find_unreferenced()?;

        stats.bytes_reclaimed = stats
            .unreferenced_objects
            .iter()
            .filter_map(|fingerprint| self.store.size_of(fingerprint))
            .sum();

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Garbage collection analysis complete in {}ms: {} objects would be deleted, {} bytes would be reclaimed",
            stats.duration_ms,
            stats.unreferenced_objects.len(),
            stats.bytes_reclaimed
        );
        Ok(stats)
    }

    fn find_unreferenced(&self) -> Result<GcStats> {
        let objects = self.store.list_chunks()?;
        let referenced = self.index.ref_counts();

        let stats = GcStats {
            objects_examined: objects.len(),
            unreferenced_objects: objects
                .into_iter()
                .filter(|fingerprint| !referenced.contains_key(fingerprint))
                .collect(),
            ..Default::default()
        };
        trace!(
            "{} of {} chunk objects are unreferenced",
            stats.unreferenced_objects.len(),
            stats.objects_examined
        );
        Ok(stats)
    }

    /// Check the index against the chunk store
    pub fn verify(&self) -> Result<VerificationReport> {
        VaultVerifier::new(&self.index, &self.store).verify_complete()
    }
}

/// Builder pattern for vault configuration
///
/// # Examples
///
/// ```rust,no_run
/// use chunkvault::VaultBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let vault = VaultBuilder::new()
///     .base_chunk_size(8192)
///     .compression_level(9)
///     .parallel_workers(4)
///     .build("./backup")?;
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// - `base_chunk_size`: 4096, within bounds `[1024, 8192]`
/// - `compression_level`: 6
/// - `min_compress_size`: 512
/// - `parallel_workers`: number of CPU cores
/// - `strict_metadata`: false
#[derive(Debug, Clone)]
pub struct VaultBuilder {
    chunker: ChunkerConfig,
    base_chunk_size: Option<usize>,
    compression_level: u32,
    min_compress_size: usize,
    parallel_workers: usize,
    strict_metadata: bool,
}

impl VaultBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        let defaults = VaultConfig::default();
        Self {
            chunker: defaults.chunker,
            base_chunk_size: None,
            compression_level: defaults.compression_level,
            min_compress_size: defaults.min_compress_size,
            parallel_workers: defaults.parallel_workers,
            strict_metadata: defaults.strict_metadata,
        }
    }

    /// Set the base chunk size
    ///
    /// Values outside the chunk size bounds are clamped into them.
    pub fn base_chunk_size(mut self, size: usize) -> Self {
        self.base_chunk_size = Some(size);
        self
    }

    /// Set the lower and upper bounds of the adaptive chunk size
    pub fn chunk_size_bounds(mut self, min_size: usize, max_size: usize) -> Self {
        self.chunker.min_size = min_size;
        self.chunker.max_size = max_size;
        self
    }

    /// Set the zlib compression level (0-9)
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Chunks smaller than this are stored without compression
    pub fn min_compress_size(mut self, size: usize) -> Self {
        self.min_compress_size = size;
        self
    }

    /// Set number of parallel workers for chunk writes
    ///
    /// Values less than 1 are automatically set to 1.
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.parallel_workers = count.max(1);
        self
    }

    /// Fail to open instead of starting empty when the metadata is unusable
    pub fn strict_metadata(mut self, strict: bool) -> Self {
        self.strict_metadata = strict;
        self
    }

    /// Build the configuration without opening anything
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidArgument`] for inconsistent settings.
    pub fn build_config(self, root: impl Into<PathBuf>) -> Result<VaultConfig> {
        self.chunker.validate()?;
        let chunker = match self.base_chunk_size {
            Some(size) => self.chunker.with_base_size(size),
            None => self.chunker.with_base_size(self.chunker.base_size),
        };

        let config = VaultConfig {
            root: root.into(),
            chunker,
            compression_level: self.compression_level,
            min_compress_size: self.min_compress_size,
            parallel_workers: self.parallel_workers,
            strict_metadata: self.strict_metadata,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Open the vault at `root` with the configured settings
    pub fn build(self, root: impl Into<PathBuf>) -> Result<Vault> {
        Vault::with_config(self.build_config(root)?)
    }
}

impl Default for VaultBuilder {
    fn default() -> Self {
        Self::new()
    }
}
