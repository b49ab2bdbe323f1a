//! Metadata index: file entries and chunk reference counts
//!
//! The index maps every stored file path to the ordered list of chunk
//! fingerprints that reconstruct it, and keeps a reference count per
//! fingerprint. It is persisted as a single JSON record:
//!
//! ```json
//! {
//!     "files": {
//!         "report.pdf": ["9f86d08...", "60303ae..."]
//!     },
//!     "chunks": {
//!         "60303ae...": 1,
//!         "9f86d08...": 2
//!     }
//! }
//! ```
//!
//! The record is loaded in full at startup and rewritten in full after every
//! mutation. A missing, empty or corrupt record never stops the vault: the
//! index starts empty and the reason is recorded in [`IndexOrigin`].
//!
//! Removing a file decrements the count of each of its chunks once per
//! occurrence. A count that reaches zero deletes the chunk object and drops
//! the entry, so the table never holds zero counts at rest.

use crate::error::{Result, VaultError};
use crate::storage::ChunkStore;
use crate::types::{Fingerprint, RemovalReport};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// On-disk schema of the metadata record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// File path -> ordered chunk fingerprints
    #[serde(default)]
    pub files: BTreeMap<String, Vec<Fingerprint>>,
    /// Fingerprint -> number of references across all files
    #[serde(default)]
    pub chunks: BTreeMap<Fingerprint, u64>,
}

/// Why a metadata record could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// The record is not valid JSON
    Syntax(String),
    /// The record is valid JSON but does not match [`IndexRecord`]
    Schema(String),
}

impl From<LoadFailure> for VaultError {
    fn from(failure: LoadFailure) -> Self {
        match failure {
            LoadFailure::Syntax(msg) => VaultError::corrupt(format!("metadata is not valid JSON: {}", msg)),
            LoadFailure::Schema(msg) => VaultError::MetadataSchema(msg),
        }
    }
}

/// How the in-memory index came to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOrigin {
    /// No record existed yet
    Fresh,
    /// The record existed but was empty
    Empty,
    /// The record was loaded successfully
    Loaded,
    /// The record was unusable and the index was reset
    Recovered(LoadFailure),
}

/// In-memory metadata index bound to its record on disk
#[derive(Debug)]
pub struct MetadataIndex {
    path: PathBuf,
    record: IndexRecord,
    origin: IndexOrigin,
}

impl MetadataIndex {
    /// Load the index from `path`
    ///
    /// # Errors
    ///
    /// Only I/O failures other than "file not found" are errors. Empty or
    /// corrupt records yield an empty index with a logged diagnostic.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No existing metadata file at {:?}. Starting fresh.", path);
                return Ok(Self::with_origin(path, IndexRecord::default(), IndexOrigin::Fresh));
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("Metadata file {:?} is not UTF-8; starting with empty metadata", path);
                let failure = LoadFailure::Syntax(e.to_string());
                return Ok(Self::with_origin(path, IndexRecord::default(), IndexOrigin::Recovered(failure)));
            }
            Err(e) => return Err(VaultError::Io(e)),
        };

        if text.trim().is_empty() {
            info!("Metadata file {:?} is empty. Starting fresh.", path);
            return Ok(Self::with_origin(path, IndexRecord::default(), IndexOrigin::Empty));
        }

        match parse_record(&text) {
            Ok(record) => {
                debug!(
                    "Loaded metadata: {} files, {} chunks",
                    record.files.len(),
                    record.chunks.len()
                );
                Ok(Self::with_origin(path, record, IndexOrigin::Loaded))
            }
            Err(failure) => {
                match &failure {
                    LoadFailure::Syntax(msg) => {
                        warn!("Error parsing metadata {:?}: {}. Starting with empty metadata.", path, msg)
                    }
                    LoadFailure::Schema(msg) => {
                        warn!("Metadata {:?} does not match the index schema: {}. Starting with empty metadata.", path, msg)
                    }
                }
                Ok(Self::with_origin(path, IndexRecord::default(), IndexOrigin::Recovered(failure)))
            }
        }
    }

    /// Load the index from `path`, refusing unusable records
    ///
    /// Absent and empty records are accepted as in [`MetadataIndex::load`].
    ///
    /// # Errors
    ///
    /// - [`VaultError::CorruptData`] if the record is not valid JSON
    /// - [`VaultError::MetadataSchema`] if it does not match [`IndexRecord`]
    /// - [`VaultError::Io`] if it cannot be read
    pub fn load_strict(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::with_origin(path, IndexRecord::default(), IndexOrigin::Fresh));
            }
            Err(e) => return Err(VaultError::Io(e)),
        };

        if text.trim().is_empty() {
            return Ok(Self::with_origin(path, IndexRecord::default(), IndexOrigin::Empty));
        }
        let record = parse_record(&text)?;
        Ok(Self::with_origin(path, record, IndexOrigin::Loaded))
    }

    fn with_origin(path: PathBuf, record: IndexRecord, origin: IndexOrigin) -> Self {
        Self { path, record, origin }
    }

    /// Record a file's chunk sequence
    ///
    /// Any existing entry for `path` is replaced outright. The chunks of the
    /// replaced entry keep their references; only the new sequence is
    /// counted, once per occurrence.
    pub fn add_file(&mut self, path: impl Into<String>, fingerprints: Vec<Fingerprint>) {
        let path = path.into();
        for fingerprint in &fingerprints {
            *self.record.chunks.entry(fingerprint.clone()).or_insert(0) += 1;
        }

        trace!("Indexed {} with {} chunks", path, fingerprints.len());
        if let Some(previous) = self.record.files.insert(path.clone(), fingerprints) {
            debug!("Replaced entry for {} ({} chunks previously referenced)", path, previous.len());
        }
    }

    /// Chunk sequence of a file, empty if the path is unknown
    pub fn get_chunks(&self, path: &str) -> &[Fingerprint] {
        self.record.files.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a file path is indexed
    pub fn contains(&self, path: &str) -> bool {
        self.record.files.contains_key(path)
    }

    /// Remove a file and garbage-collect chunks nobody references anymore
    ///
    /// The index is saved before returning.
    ///
    /// # Errors
    ///
    /// - [`VaultError::FileNotFound`] if `path` is not indexed; nothing is
    ///   modified in that case
    /// - [`VaultError::Io`] if the index cannot be saved
    pub fn remove_file(&mut self, path: &str, store: &ChunkStore) -> Result<RemovalReport> {
        let Some(fingerprints) = self.record.files.remove(path) else {
            debug!("File not found in metadata: {}", path);
            return Err(VaultError::FileNotFound(path.to_string()));
        };

        let mut report = RemovalReport {
            path: path.to_string(),
            ..Default::default()
        };

        for fingerprint in &fingerprints {
            let Some(count) = self.record.chunks.get_mut(fingerprint) else {
                warn!("Chunk {} referenced by {} has no reference count", fingerprint.short(), path);
                continue;
            };
            *count = count.saturating_sub(1);
            report.references_released += 1;

            if *count == 0 {
                self.record.chunks.remove(fingerprint);
                match store.delete(fingerprint) {
                    Ok(()) => report.chunks_deleted += 1,
                    Err(e) => warn!("Failed to delete chunk {}: {}", fingerprint.short(), e),
                }
            }
        }

        self.save()?;
        info!(
            "Removed {}: {} references released, {} chunks deleted",
            path, report.references_released, report.chunks_deleted
        );
        Ok(report)
    }

    /// Write the full record to disk, replacing any previous one
    pub fn save(&self) -> Result<()> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.record.serialize(&mut serializer)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        utils::atomic_write(&self.path, &buffer)?;

        trace!("Saved metadata ({} bytes) to {:?}", buffer.len(), self.path);
        Ok(())
    }

    /// Iterate over file entries in path order
    pub fn files(&self) -> impl Iterator<Item = (&str, &[Fingerprint])> + '_ {
        self.record
            .files
            .iter()
            .map(|(path, fingerprints)| (path.as_str(), fingerprints.as_slice()))
    }

    /// Reference count of a chunk (0 if untracked)
    pub fn ref_count(&self, fingerprint: &Fingerprint) -> u64 {
        self.record.chunks.get(fingerprint).copied().unwrap_or(0)
    }

    /// The full reference count table
    pub fn ref_counts(&self) -> &BTreeMap<Fingerprint, u64> {
        &self.record.chunks
    }

    /// Reference counts implied by the current file entries
    pub fn expected_ref_counts(&self) -> BTreeMap<Fingerprint, u64> {
        let mut expected = BTreeMap::new();
        for fingerprints in self.record.files.values() {
            for fingerprint in fingerprints {
                *expected.entry(fingerprint.clone()).or_insert(0) += 1;
            }
        }
        expected
    }

    /// Number of indexed files
    pub fn file_count(&self) -> usize {
        self.record.files.len()
    }

    /// Number of chunks with a reference count
    pub fn unique_chunk_count(&self) -> usize {
        self.record.chunks.len()
    }

    /// Whether no files are indexed
    pub fn is_empty(&self) -> bool {
        self.record.files.is_empty()
    }

    /// How the index was obtained at load time
    pub fn origin(&self) -> &IndexOrigin {
        &self.origin
    }

    /// Location of the record on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory record
    pub fn record(&self) -> &IndexRecord {
        &self.record
    }
}

/// Parse a record, telling syntax errors apart from schema mismatches
fn parse_record(text: &str) -> std::result::Result<IndexRecord, LoadFailure> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| LoadFailure::Syntax(e.to_string()))?;
    let mut record =
        IndexRecord::deserialize(value).map_err(|e| LoadFailure::Schema(e.to_string()))?;

    let before = record.chunks.len();
    record.chunks.retain(|_, count| *count > 0);
    if record.chunks.len() != before {
        debug!("Dropped {} zero reference counts", before - record.chunks.len());
    }
    Ok(record)
}
