//! Integration tests for chunkvault
//!
//! Exercises whole store/retrieve/delete scenarios against a real vault
//! directory: round trips across sizes, deduplication, reference counting
//! and garbage collection of shared chunks.

use ::chunkvault::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::info;

/// Test harness owning a scratch directory and a vault inside it
pub struct VaultTestHarness {
    pub work_dir: TempDir,
    pub vault: Vault,
    pub file_generator: FileGenerator,
    retrieved: usize,
}

impl VaultTestHarness {
    /// Create a new test harness
    pub fn new() -> Self {
        Self::with_builder(VaultBuilder::new())
    }

    /// Create a harness with a customized builder
    pub fn with_builder(builder: VaultBuilder) -> Self {
        let work_dir = TempDir::new().unwrap();
        let vault = builder.build(work_dir.path().join("vault")).unwrap();

        Self {
            work_dir,
            vault,
            file_generator: FileGenerator::new(42),
            retrieved: 0,
        }
    }

    /// Vault root directory
    pub fn root(&self) -> PathBuf {
        self.vault.config().root.clone()
    }

    /// Write a source file into the scratch directory
    pub fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.work_dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Write and store a file, returning the store report
    pub fn store(&mut self, name: &str, content: &[u8]) -> StoreReport {
        let path = self.write_file(name, content);
        self.vault.store_file(&path).unwrap()
    }

    /// Reconstruct a stored file and return its bytes
    pub fn retrieve_bytes(&mut self, path: &str) -> anyhow::Result<Vec<u8>> {
        self.retrieved += 1;
        let output = self.work_dir.path().join(format!("out_{}", self.retrieved));
        let report = self.vault.retrieve_file_to(path, &output)?;
        anyhow::ensure!(report.is_complete(), "incomplete retrieve of {}", path);
        Ok(fs::read(output)?)
    }

    /// Reopen the vault from disk, as a new process would
    pub fn reopen(&mut self) {
        self.vault = Vault::open(self.root()).unwrap();
    }

    /// Number of chunk objects on disk
    pub fn object_count(&self) -> usize {
        self.vault.chunk_store().list_chunks().unwrap().len()
    }
}

/// Deterministic content generator
pub struct FileGenerator {
    pub rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Incompressible bytes
    pub fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut content = vec![0u8; len];
        self.rng.fill(&mut content[..]);
        content
    }

    /// Text-like, compressible bytes
    pub fn text(&mut self, len: usize) -> Vec<u8> {
        const WORDS: &[&str] = &["chunk", "vault", "store", "index", "frame", "dedup", "\n"];
        let mut content = Vec::with_capacity(len + 8);
        while content.len() < len {
            content.extend_from_slice(WORDS[self.rng.random_range(0..WORDS.len())].as_bytes());
            content.push(b' ');
        }
        content.truncate(len);
        content
    }
}

fn expected_sizes(len: u64, config: ChunkerConfig) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut processed = 0u64;
    while processed < len {
        let target = config.target_chunk_size(len - processed, len) as u64;
        let size = target.min(len - processed);
        sizes.push(size as usize);
        processed += size;
    }
    sizes
}

fn chunk_lengths(vault: &Vault, path: &str) -> Vec<usize> {
    vault
        .index()
        .get_chunks(path)
        .iter()
        .map(|fp| vault.chunk_store().load(fp).unwrap().into_decoded().unwrap().len())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_round_trip_across_sizes() {
        let mut harness = VaultTestHarness::new();

        for &size in &[0usize, 1, 511, 512, 4095, 10 * 1024 * 1024] {
            info!("Round trip of {} bytes", size);
            let content = if size > 1_000_000 {
                let mut content = harness.file_generator.text(size / 2);
                content.extend(harness.file_generator.random_bytes(size - size / 2));
                content
            } else {
                harness.file_generator.random_bytes(size)
            };

            let name = format!("file_{}.bin", size);
            let report = harness.store(&name, &content);
            assert_eq!(report.bytes_read, size as u64);

            let restored = harness.retrieve_bytes(&report.path).unwrap();
            assert_eq!(restored.len(), content.len());
            assert!(restored == content, "round trip of {} bytes differs", size);
        }
    }

    #[test]
    fn test_chunk_sizes_follow_size_function() {
        let mut harness = VaultTestHarness::new();
        let content = harness.file_generator.random_bytes(123_457);
        let report = harness.store("sized.bin", &content);

        let lengths = chunk_lengths(&harness.vault, &report.path);
        assert_eq!(lengths, expected_sizes(content.len() as u64, ChunkerConfig::default()));

        let (last, body) = lengths.split_last().unwrap();
        assert!(body.iter().all(|&len| (1024..=8192).contains(&len)));
        assert!(*last > 0 && *last <= 8192);
        assert_eq!(lengths.iter().sum::<usize>(), content.len());
    }

    #[test]
    fn test_base_chunk_size_override() {
        let mut small = VaultTestHarness::with_builder(VaultBuilder::new().base_chunk_size(1024));
        let mut large = VaultTestHarness::with_builder(VaultBuilder::new().base_chunk_size(8192));
        let content = small.file_generator.random_bytes(100_000);

        let small_report = small.store("f.bin", &content);
        let large_report = large.store("f.bin", &content);
        assert_eq!(small_report.base_chunk_size, 1024);
        assert_eq!(large_report.base_chunk_size, 8192);
        assert!(small_report.chunk_count > large_report.chunk_count);
        assert_eq!(chunk_lengths(&large.vault, &large_report.path)[0], 8192);
    }

    #[test]
    fn test_storing_twice_writes_no_new_objects() {
        let mut harness = VaultTestHarness::new();
        let content = harness.file_generator.random_bytes(50_000);

        let first = harness.store("same.bin", &content);
        let objects = harness.object_count();
        assert_eq!(first.chunks_written, objects);

        let second = harness.store("same.bin", &content);
        assert_eq!(second.chunks_written, 0);
        assert_eq!(second.chunks_deduplicated, second.chunk_count);
        assert_eq!(harness.object_count(), objects);
    }

    #[test]
    fn test_same_content_under_two_paths() {
        let mut harness = VaultTestHarness::new();
        let content = harness.file_generator.random_bytes(40_000);

        let a = harness.store("a.bin", &content);
        let b = harness.store("b.bin", &content);
        assert_eq!(harness.vault.index().get_chunks(&a.path), harness.vault.index().get_chunks(&b.path));

        for fp in harness.vault.index().get_chunks(&a.path) {
            assert_eq!(harness.vault.index().ref_count(fp), 2);
        }
    }

    #[test]
    fn test_frame_sizes_on_disk() {
        let mut harness = VaultTestHarness::new();

        let small = harness.store("small.bin", &[7u8; 100]);
        let fp = &harness.vault.index().get_chunks(&small.path)[0];
        assert_eq!(harness.vault.chunk_store().size_of(fp), Some(104));

        let zeros = harness.vault.chunk_store().store(&[vec![0u8; 10_000]]);
        let size = harness.vault.chunk_store().size_of(&zeros.fingerprints[0]).unwrap();
        assert!(size < 10_004);
        let decoded = harness.vault.chunk_store().load(&zeros.fingerprints[0]).unwrap();
        assert_eq!(decoded, DecodeResult::Decoded(vec![0u8; 10_000]));
    }

    #[test]
    #[traced_test]
    fn test_shared_chunk_garbage_collection() {
        let mut harness = VaultTestHarness::new();
        let shared = harness.file_generator.random_bytes(20_000);
        let mut a_content = shared.clone();
        a_content.extend(harness.file_generator.random_bytes(20_000));
        let mut b_content = shared;
        b_content.extend(harness.file_generator.random_bytes(20_000));

        let a = harness.store("a.bin", &a_content);
        let b = harness.store("b.bin", &b_content);

        let a_fps: BTreeSet<Fingerprint> = harness.vault.index().get_chunks(&a.path).iter().cloned().collect();
        let b_fps: BTreeSet<Fingerprint> = harness.vault.index().get_chunks(&b.path).iter().cloned().collect();
        let common: BTreeSet<Fingerprint> = a_fps.intersection(&b_fps).cloned().collect();
        assert!(!common.is_empty());
        info!("{} chunks shared between a and b", common.len());

        let removal = harness.vault.delete_file(&a.path).unwrap();
        assert_eq!(removal.chunks_deleted, a_fps.len() - common.len());
        for fp in &a_fps {
            assert_eq!(harness.vault.chunk_store().contains(fp), common.contains(fp));
        }
        for fp in &common {
            assert_eq!(harness.vault.index().ref_count(fp), 1);
        }
        assert_eq!(harness.retrieve_bytes(&b.path).unwrap(), b_content);

        harness.vault.delete_file(&b.path).unwrap();
        assert_eq!(harness.object_count(), 0);
        assert!(harness.vault.index().ref_counts().is_empty());
    }

    #[test]
    fn test_unknown_path_changes_nothing() {
        let mut harness = VaultTestHarness::new();
        harness.store("known.bin", b"known content");
        let metadata_path = harness.vault.config().metadata_path();
        let before = fs::read(&metadata_path).unwrap();

        let err = harness.vault.retrieve_file("unknown.bin").unwrap_err();
        assert!(matches!(err, VaultError::FileNotFound(_)));
        let err = harness.vault.delete_file("unknown.bin").unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(fs::read(&metadata_path).unwrap(), before);
        assert_eq!(harness.object_count(), 1);
    }

    #[test]
    fn test_restore_under_same_path_keeps_old_references() {
        // Re-storing a path replaces its entry without releasing the old
        // chunks; they stay referenced and are never collected.
        let mut harness = VaultTestHarness::new();
        let v1 = harness.store("doc.txt", b"version one");
        let v1_fp = harness.vault.index().get_chunks(&v1.path)[0].clone();
        let v2 = harness.store("doc.txt", b"version two");
        let v2_fp = harness.vault.index().get_chunks(&v2.path)[0].clone();

        assert_eq!(harness.vault.index().ref_count(&v1_fp), 1);
        assert_eq!(harness.vault.index().ref_count(&v2_fp), 1);
        assert_eq!(harness.retrieve_bytes(&v2.path).unwrap(), b"version two");

        harness.vault.delete_file(&v2.path).unwrap();
        assert!(!harness.vault.chunk_store().contains(&v2_fp));
        assert!(harness.vault.chunk_store().contains(&v1_fp));
        assert_eq!(harness.vault.index().ref_count(&v1_fp), 1);

        let report = harness.vault.verify().unwrap();
        assert_eq!(report.ref_count_mismatches.len(), 1);
        assert_eq!(report.ref_count_mismatches[0].fingerprint, v1_fp);
    }

    #[test]
    fn test_state_survives_reopen() {
        let mut harness = VaultTestHarness::new();
        let content = harness.file_generator.text(30_000);
        let report = harness.store("persist.txt", &content);
        let counts: BTreeMap<Fingerprint, u64> = harness.vault.index().ref_counts().clone();

        harness.reopen();
        assert_eq!(harness.vault.index().origin(), &IndexOrigin::Loaded);
        assert_eq!(harness.vault.index().ref_counts(), &counts);
        assert_eq!(harness.retrieve_bytes(&report.path).unwrap(), content);
    }

    #[test]
    fn test_parallel_and_sequential_writes_agree() {
        let mut sequential = VaultTestHarness::with_builder(VaultBuilder::new().parallel_workers(1));
        let mut parallel = VaultTestHarness::with_builder(VaultBuilder::new().parallel_workers(8));
        let content = sequential.file_generator.random_bytes(300_000);

        let a = sequential.store("f.bin", &content);
        let b = parallel.store("f.bin", &content);
        assert_eq!(
            sequential.vault.index().get_chunks(&a.path),
            parallel.vault.index().get_chunks(&b.path)
        );
        assert_eq!(sequential.object_count(), parallel.object_count());
    }

    #[test]
    fn test_list_statistics() {
        let mut harness = VaultTestHarness::new();
        let text = harness.file_generator.text(64 * 1024);
        harness.store("big.txt", &text);
        harness.store("copy.txt", &text);
        harness.store("tiny.txt", b"tiny");

        let stats = harness.vault.stats();
        assert_eq!(stats.file_count(), 3);
        assert_eq!(stats.files[2].path, harness.write_file("tiny.txt", b"tiny").to_string_lossy());
        assert_eq!(stats.logical_bytes, 2 * text.len() as u64 + 4);
        assert!(stats.physical_bytes < text.len() as u64);
        assert!(stats.files[0].savings_percent() > 50.0);
        assert!(stats.savings_percent() > 75.0);
    }

    #[test]
    fn test_verify_clean_vault() {
        let mut harness = VaultTestHarness::new();
        for i in 0..5 {
            let content = harness.file_generator.text(5_000 * (i + 1));
            harness.store(&format!("f{}.txt", i), &content);
        }
        let report = harness.vault.verify().unwrap();
        assert!(report.is_valid(), "{}", report.summary());
        assert_eq!(report.files_checked, 5);
    }
}

