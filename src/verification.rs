//! Vault verification and integrity checking
//!
//! Verification cross-checks the metadata index against the chunk store:
//!
//! 1. **Reference counts**: the recorded count of every fingerprint is
//!    compared with the count implied by the file entries
//! 2. **Chunk objects**: every referenced chunk must exist, decode cleanly
//!    and hash back to its fingerprint
//! 3. **Orphans**: chunk objects without a reference count entry are listed
//!
//! Verification never modifies the vault. Problems are collected in the
//! [`VerificationReport`] rather than returned as errors.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chunkvault::Vault;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = Vault::open(".")?;
//! let report = vault.verify()?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

use crate::compression::DecodeResult;
use crate::error::Result;
use crate::index::MetadataIndex;
use crate::storage::ChunkStore;
use crate::types::Fingerprint;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info};

/// Verifier for an index and the chunk store it refers to
#[derive(Debug)]
pub struct VaultVerifier<'a> {
    index: &'a MetadataIndex,
    store: &'a ChunkStore,
}

impl<'a> VaultVerifier<'a> {
    /// Create a new verifier
    pub fn new(index: &'a MetadataIndex, store: &'a ChunkStore) -> Self {
        Self { index, store }
    }

    /// Run every check
    ///
    /// # Errors
    ///
    /// Returns an error only if the chunk directory cannot be listed.
    /// Verification failures are reported in the result.
    pub fn verify_complete(&self) -> Result<VerificationReport> {
        let start = Instant::now();
        let mut report = VerificationReport {
            files_checked: self.index.file_count(),
            ..Default::default()
        };

        // 1. Reference counts
        let expected = self.index.expected_ref_counts();
        let recorded = self.index.ref_counts();
        let all_fingerprints: BTreeSet<&Fingerprint> = expected.keys().chain(recorded.keys()).collect();
        for fingerprint in all_fingerprints {
            let expected_count = expected.get(fingerprint).copied().unwrap_or(0);
            let recorded_count = recorded.get(fingerprint).copied().unwrap_or(0);
            if expected_count != recorded_count {
                report.ref_count_mismatches.push(RefCountMismatch {
                    fingerprint: fingerprint.clone(),
                    recorded: recorded_count,
                    expected: expected_count,
                });
            }
        }

        // 2. Referenced chunk objects
        debug!("Verifying {} referenced chunks", expected.len());
        let pool = if expected.len() > 1 { self.store.worker_pool() } else { None };
        let checks: Vec<ChunkVerification> = match pool {
            Some(pool) => pool.install(|| {
                expected
                    .par_iter()
                    .map(|(fingerprint, _)| self.verify_chunk(fingerprint))
                    .collect()
            }),
            None => expected.keys().map(|fingerprint| self.verify_chunk(fingerprint)).collect(),
        };
        report.chunks_checked = checks.len();
        report.chunks_valid = checks.iter().filter(|c| c.is_valid()).count();
        report.failed_chunks = checks.into_iter().filter(|c| !c.is_valid()).collect();

        // 3. Orphaned objects
        report.orphaned_objects = self
            .store
            .list_chunks()?
            .into_iter()
            .filter(|fingerprint| !recorded.contains_key(fingerprint))
            .collect();

        report.verification_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Verified {} files in {}ms: {} / {} chunks valid, {} ref count mismatches, {} orphans",
            report.files_checked,
            report.verification_time_ms,
            report.chunks_valid,
            report.chunks_checked,
            report.ref_count_mismatches.len(),
            report.orphaned_objects.len()
        );

        Ok(report)
    }

    fn verify_chunk(&self, fingerprint: &Fingerprint) -> ChunkVerification {
        let mut verification = ChunkVerification {
            fingerprint: fingerprint.clone(),
            object_exists: false,
            decodes: false,
            hash_valid: false,
            error: None,
        };

        verification.object_exists = self.store.contains(fingerprint);
        if !verification.object_exists {
            verification.error = Some(format!("Chunk {} not found", fingerprint.short()));
            return verification;
        }

        match self.store.load(fingerprint) {
            Ok(DecodeResult::Decoded(content)) => {
                verification.decodes = true;
                verification.hash_valid = QuickVerifier::verify_chunk(fingerprint, &content);
                if !verification.hash_valid {
                    verification.error = Some(format!("Chunk {} content does not match its fingerprint", fingerprint.short()));
                }
            }
            Ok(DecodeResult::Degraded(_)) => {
                verification.error = Some(format!("Chunk {} failed to decode", fingerprint.short()));
            }
            Err(e) => {
                verification.error = Some(format!("Failed to load chunk {}: {}", fingerprint.short(), e));
            }
        }

        verification
    }
}

/// Recorded reference count that disagrees with the file entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefCountMismatch {
    /// Chunk fingerprint
    pub fingerprint: Fingerprint,
    /// Count stored in the index
    pub recorded: u64,
    /// Count implied by the file entries
    pub expected: u64,
}

/// Verification result for a single chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkVerification {
    /// Chunk fingerprint
    pub fingerprint: Fingerprint,
    /// Whether the chunk object exists
    pub object_exists: bool,
    /// Whether the frame decoded cleanly
    pub decodes: bool,
    /// Whether the decoded content hashes to the fingerprint
    pub hash_valid: bool,
    /// Error message if verification failed
    pub error: Option<String>,
}

impl ChunkVerification {
    /// Check if the chunk verification passed
    pub fn is_valid(&self) -> bool {
        self.object_exists && self.decodes && self.hash_valid && self.error.is_none()
    }
}

/// Outcome of [`VaultVerifier::verify_complete`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Number of file entries in the index
    pub files_checked: usize,
    /// Number of distinct referenced chunks checked
    pub chunks_checked: usize,
    /// Number of chunks that passed every check
    pub chunks_valid: usize,
    /// Chunks that failed a check
    pub failed_chunks: Vec<ChunkVerification>,
    /// Reference counts that disagree with the file entries
    pub ref_count_mismatches: Vec<RefCountMismatch>,
    /// Chunk objects without a reference count entry
    pub orphaned_objects: Vec<Fingerprint>,
    /// Time taken for verification in milliseconds
    pub verification_time_ms: u64,
}

impl VerificationReport {
    /// Check if the vault is fully consistent
    pub fn is_valid(&self) -> bool {
        self.failed_chunks.is_empty()
            && self.ref_count_mismatches.is_empty()
            && self.orphaned_objects.is_empty()
    }

    /// Get a summary of the verification
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!(
                "Vault is valid ({} files, {} chunks verified in {}ms)",
                self.files_checked, self.chunks_checked, self.verification_time_ms
            )
        } else {
            let issues = [
                (!self.failed_chunks.is_empty())
                    .then(|| format!("{} damaged or missing chunks", self.failed_chunks.len())),
                (!self.ref_count_mismatches.is_empty())
                    .then(|| format!("{} reference count mismatches", self.ref_count_mismatches.len())),
                (!self.orphaned_objects.is_empty())
                    .then(|| format!("{} orphaned objects", self.orphaned_objects.len())),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");

            format!(
                "Vault is invalid: {} ({}/{} chunks valid)",
                issues, self.chunks_valid, self.chunks_checked
            )
        }
    }
}

/// Hash-only checks that need no store access
pub struct QuickVerifier;

impl QuickVerifier {
    /// Check that content hashes to the given fingerprint
    pub fn verify_chunk(fingerprint: &Fingerprint, content: &[u8]) -> bool {
        Fingerprint::of(content) == *fingerprint
    }
}
