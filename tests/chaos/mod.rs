//! Chaos testing for chunkvault
//!
//! Damages a vault on disk the way crashes, bad disks and stray edits do,
//! then checks that loading, retrieval and verification degrade instead of
//! failing.

use ::chunkvault::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

/// Chaos testing harness
pub struct VaultChaosTest {
    pub work_dir: TempDir,
    pub vault: Vault,
    pub chaos_engine: ChaosEngine,
}

impl VaultChaosTest {
    pub fn new() -> Self {
        let work_dir = TempDir::new().unwrap();
        let vault = Vault::open(work_dir.path().join("vault")).unwrap();

        Self {
            work_dir,
            vault,
            chaos_engine: ChaosEngine::new(42),
        }
    }

    /// Store `content` under `name` and return the index key
    pub fn store(&mut self, name: &str, content: &[u8]) -> String {
        let path = self.work_dir.path().join(name);
        fs::write(&path, content).unwrap();
        self.vault.store_file(&path).unwrap().path
    }

    /// Reopen the vault from disk
    pub fn reopen(&mut self) {
        self.vault = Vault::open(self.vault.config().root.clone()).unwrap();
    }

    /// On-disk path of a chunk object
    pub fn object_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.vault.chunk_store().dir().join(fingerprint.as_str())
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.vault.config().metadata_path()
    }

    /// Retrieve into a fresh output file
    pub fn retrieve(&self, path: &str, output: &str) -> (RetrieveReport, Vec<u8>) {
        let output = self.work_dir.path().join(output);
        let report = self.vault.retrieve_file_to(path, &output).unwrap();
        let bytes = fs::read(&output).unwrap();
        (report, bytes)
    }
}

/// Seeded source of damage
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn random_content(&mut self, len: usize) -> Vec<u8> {
        let mut content = vec![0u8; len];
        self.rng.fill(&mut content[..]);
        content
    }

    /// Flip one byte of a file to a different value
    pub fn corrupt_file(&mut self, path: &Path) -> anyhow::Result<usize> {
        let mut content = fs::read(path)?;
        anyhow::ensure!(!content.is_empty(), "cannot corrupt empty file {:?}", path);

        let pos = self.rng.random_range(0..content.len());
        content[pos] ^= self.rng.random_range(1..=255u8);
        fs::write(path, content)?;
        warn!("Corrupted byte {} of {:?}", pos, path);
        Ok(pos)
    }

    /// Cut a file down to a random shorter length
    pub fn truncate_file(&mut self, path: &Path) -> anyhow::Result<usize> {
        let content = fs::read(path)?;
        anyhow::ensure!(content.len() > 1, "file {:?} too short to truncate", path);

        let new_len = self.rng.random_range(1..content.len());
        fs::write(path, &content[..new_len])?;
        warn!("Truncated {:?} from {} to {} bytes", path, content.len(), new_len);
        Ok(new_len)
    }

    /// Pick `count` distinct items
    pub fn pick<T: Clone + Ord>(&mut self, items: &[T], count: usize) -> Vec<T> {
        let mut picked = BTreeSet::new();
        while picked.len() < count.min(items.len()) {
            picked.insert(items[self.rng.random_range(0..items.len())].clone());
        }
        picked.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_random_object_corruption_is_detected() {
        let mut chaos = VaultChaosTest::new();
        let content = chaos.chaos_engine.random_content(100_000);
        let mut text = b"lorem ipsum dolor sit amet ".repeat(4_000);
        text.truncate(100_000);
        let random_path = chaos.store("random.bin", &content);
        let text_path = chaos.store("text.txt", &text);

        let objects = chaos.vault.chunk_store().list_chunks().unwrap();
        let victims = chaos.chaos_engine.pick(&objects, 5);
        for fingerprint in &victims {
            let path = chaos.object_path(fingerprint);
            chaos.chaos_engine.corrupt_file(&path).unwrap();
        }
        info!("Corrupted {} of {} objects", victims.len(), objects.len());

        let report = chaos.vault.verify().unwrap();
        assert!(!report.is_valid());
        let failed: BTreeSet<Fingerprint> =
            report.failed_chunks.iter().map(|c| c.fingerprint.clone()).collect();
        assert_eq!(failed, victims.iter().cloned().collect());

        // Retrieval never aborts on damaged objects
        chaos.retrieve(&random_path, "random.out");
        chaos.retrieve(&text_path, "text.out");
    }

    #[test]
    fn test_truncated_compressed_object_is_skipped() {
        let mut chaos = VaultChaosTest::new();
        let content = vec![b'z'; 20_000];
        let path = chaos.store("zeds.txt", &content);
        let chunks = chaos.vault.index().get_chunks(&path).to_vec();

        // Every chunk of a run of one byte is compressed; truncation breaks the stream
        let victim = chunks[0].clone();
        chaos.chaos_engine.truncate_file(&chaos.object_path(&victim)).unwrap();

        let (report, bytes) = chaos.retrieve(&path, "zeds.out");
        assert!(!report.is_complete());
        assert_eq!(report.degraded_chunks, vec![victim.clone()]);
        assert!(report.missing_chunks.is_empty());

        let first_len = chaos.vault.config().chunker.target_chunk_size(20_000, 20_000);
        assert_eq!(bytes.len(), content.len() - first_len);
        assert!(bytes.iter().all(|&b| b == b'z'));

        let verification = chaos.vault.verify().unwrap();
        assert_eq!(verification.failed_chunks.len(), 1);
        assert!(verification.failed_chunks[0].object_exists);
        assert!(!verification.failed_chunks[0].decodes);
    }

    #[test]
    fn test_garbled_object_of_declared_length_is_written() {
        let mut chaos = VaultChaosTest::new();
        let content = vec![b'z'; 20_000];
        let path = chaos.store("zeds.txt", &content);
        let chunks = chaos.vault.index().get_chunks(&path).to_vec();
        let first_len = chaos.vault.config().chunker.target_chunk_size(20_000, 20_000);

        // Header keeps the original size; the frame as a whole is exactly that long
        let victim = chunks[0].clone();
        let mut frame = (first_len as u32).to_le_bytes().to_vec();
        frame.resize(first_len, 0xAB);
        fs::write(chaos.object_path(&victim), &frame).unwrap();

        let (report, bytes) = chaos.retrieve(&path, "zeds.out");
        assert!(!report.is_complete());
        assert_eq!(report.degraded_chunks, vec![victim]);
        assert!(report.missing_chunks.is_empty());
        assert_eq!(report.chunks_written, chunks.len());
        assert_eq!(report.bytes_written, content.len() as u64);

        assert_eq!(bytes.len(), content.len());
        assert_eq!(&bytes[..first_len], &frame[..]);
        assert!(bytes[first_len..].iter().all(|&b| b == b'z'));
    }

    #[test]
    fn test_missing_object_is_skipped() {
        let mut chaos = VaultChaosTest::new();
        let content = chaos.chaos_engine.random_content(30_000);
        let path = chaos.store("holes.bin", &content);
        let chunks = chaos.vault.index().get_chunks(&path).to_vec();
        assert!(chunks.len() > 2);

        let victim = chunks[1].clone();
        fs::remove_file(chaos.object_path(&victim)).unwrap();

        let (report, bytes) = chaos.retrieve(&path, "holes.out");
        assert_eq!(report.missing_chunks, vec![victim]);
        assert_eq!(report.chunks_written, chunks.len() - 1);

        let config = chaos.vault.config().chunker;
        let first = config.target_chunk_size(30_000, 30_000);
        let second = config.target_chunk_size(30_000 - first as u64, 30_000);
        let mut expected = content[..first].to_vec();
        expected.extend_from_slice(&content[first + second..]);
        assert_eq!(bytes, expected);

        // Deleting the file still succeeds with the object gone
        let removal = chaos.vault.delete_file(&path).unwrap();
        assert_eq!(removal.chunks_deleted, chunks.len());
        assert!(chaos.vault.chunk_store().list_chunks().unwrap().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_garbage_metadata_resets_index() {
        let mut chaos = VaultChaosTest::new();
        let content = chaos.chaos_engine.random_content(10_000);
        chaos.store("before.bin", &content);

        let garbage = chaos.chaos_engine.random_content(256);
        fs::write(chaos.metadata_path(), garbage).unwrap();
        chaos.reopen();

        assert!(matches!(chaos.vault.index().origin(), IndexOrigin::Recovered(_)));
        assert!(chaos.vault.index().is_empty());
        // Objects from before the reset must survive a gc attempt
        let objects = chaos.vault.chunk_store().list_chunks().unwrap().len();
        assert!(chaos.vault.gc().is_err());
        assert_eq!(chaos.vault.chunk_store().list_chunks().unwrap().len(), objects);

        // The vault keeps working and rewrites a valid record
        let after = chaos.store("after.bin", b"fresh start");
        chaos.reopen();
        assert_eq!(chaos.vault.index().origin(), &IndexOrigin::Loaded);
        assert_eq!(chaos.vault.list_files(), vec![after]);
    }

    #[test]
    fn test_truncated_metadata_resets_index() {
        let mut chaos = VaultChaosTest::new();
        chaos.store("a.txt", b"some content");
        let record = fs::read(chaos.metadata_path()).unwrap();
        fs::write(chaos.metadata_path(), &record[..record.len() / 2]).unwrap();
        chaos.reopen();

        assert!(matches!(
            chaos.vault.index().origin(),
            IndexOrigin::Recovered(LoadFailure::Syntax(_))
        ));
        assert!(chaos.vault.index().is_empty());
    }

    #[test]
    fn test_wrong_shape_metadata_resets_index() {
        let mut chaos = VaultChaosTest::new();
        fs::create_dir_all(chaos.vault.config().root.clone()).unwrap();
        fs::write(chaos.metadata_path(), r#"{"files": [1, 2, 3], "chunks": {}}"#).unwrap();
        chaos.reopen();

        assert!(matches!(
            chaos.vault.index().origin(),
            IndexOrigin::Recovered(LoadFailure::Schema(_))
        ));

        let strict = VaultBuilder::new()
            .strict_metadata(true)
            .build(chaos.vault.config().root.clone());
        assert!(matches!(strict, Err(VaultError::MetadataSchema(_))));
    }

    #[test]
    fn test_interrupted_store_leaves_collectable_orphans() {
        let mut chaos = VaultChaosTest::new();
        let kept = chaos.store("kept.bin", b"referenced content");

        // Objects written without a matching index update
        let orphans = chaos.vault.chunk_store().store(&[
            chaos.chaos_engine.random_content(2_000),
            chaos.chaos_engine.random_content(3_000),
        ]);
        assert_eq!(orphans.written, 2);

        let report = chaos.vault.verify().unwrap();
        assert_eq!(report.orphaned_objects.len(), 2);
        assert!(report.ref_count_mismatches.is_empty());

        let stats = chaos.vault.gc().unwrap();
        assert_eq!(stats.objects_deleted, 2);
        assert!(stats.bytes_reclaimed > 5_000);
        assert!(chaos.vault.verify().unwrap().is_valid());
        assert_eq!(chaos.retrieve(&kept, "kept.out").1, b"referenced content");
    }

    #[test]
    fn test_stray_files_in_chunk_directory_are_ignored() {
        let mut chaos = VaultChaosTest::new();
        chaos.store("a.txt", b"content");
        let dir = chaos.vault.chunk_store().dir().to_path_buf();
        fs::write(dir.join("not-a-fingerprint"), b"junk").unwrap();
        fs::write(dir.join(".DS_Store"), b"junk").unwrap();

        assert_eq!(chaos.vault.chunk_store().list_chunks().unwrap().len(), 1);
        assert_eq!(chaos.vault.gc().unwrap().objects_deleted, 0);
        assert!(dir.join("not-a-fingerprint").exists());
    }
}
