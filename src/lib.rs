//! # chunkvault - Deduplicating chunk store for file backups
//!
//! A content-addressed backup store that splits files into variable-size
//! chunks, keeps every unique chunk exactly once (compressed), and tracks
//! which files reference which chunks.
//!
//! ## Overview
//!
//! chunkvault provides:
//! - Adaptive chunking: chunk sizes shrink towards the end of a file
//! - Content addressing: chunks are named by their SHA-256 fingerprint, so
//!   identical content is stored once across all files
//! - Compression: chunks are stored in a small self-describing zlib frame
//! - Reference counting: deleting a file removes the chunks nobody else uses
//! - Verification and garbage collection of orphaned chunk objects
//!
//! ## Architecture
//!
//! - **Chunker** ([`chunker`]): lazy iterator over the chunks of a file
//! - **Chunk store** ([`storage`], [`compression`]): framed chunk objects in
//!   a flat directory, one file per fingerprint
//! - **Metadata index** ([`index`]): file paths to chunk sequences plus
//!   per-chunk reference counts, persisted as one JSON record
//! - **Vault** ([`vault`]): the orchestrator tying the three together
//!
//! On disk a vault is a directory holding `chunks/<fingerprint>` objects
//! and a `metadata.json` record.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chunkvault::{Vault, VaultBuilder};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut vault = VaultBuilder::new()
//!     .base_chunk_size(4096)
//!     .build("./backup")?;
//!
//! // Store two copies of the same file: the second one adds no chunks
//! vault.store_file(Path::new("photo.jpg"))?;
//! let report = vault.store_file(Path::new("photo-copy.jpg"))?;
//! assert_eq!(report.chunks_written, 0);
//!
//! // Reconstruct it as retrieved_photo.jpg
//! vault.retrieve_file("photo.jpg")?;
//!
//! // Chunks are still referenced by the copy, so nothing is deleted yet
//! let removal = vault.delete_file("photo.jpg")?;
//! assert_eq!(removal.chunks_deleted, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, VaultError>`. Damaged chunk objects do
//! not abort a retrieve: they are skipped and listed in the
//! [`RetrieveReport`]. A corrupt metadata record resets the index to empty
//! with a logged warning unless strict loading is requested.
//!
//! ## Module Organization
//!
//! - [`chunker`]: Adaptive chunking
//! - [`compression`]: Chunk frame encoding and decoding
//! - [`storage`]: Content-addressed chunk objects
//! - [`index`]: Metadata index and reference counting
//! - [`stats`]: Store statistics
//! - [`verification`]: Integrity checking
//! - [`types`]: Common types and configuration
//! - [`error`]: Error types and handling

pub mod chunker;
pub mod compression;
pub mod error;
pub mod index;
pub mod stats;
pub mod storage;
pub mod types;
pub mod utils;
pub mod vault;
pub mod verification;

// Re-export main types for convenience
pub use chunker::{Chunker, ChunkerConfig};
pub use compression::{CompressionEngine, DecodeResult};
pub use error::{Result, VaultError};
pub use index::{IndexOrigin, LoadFailure, MetadataIndex};
pub use stats::{FileStats, StoreStats};
pub use storage::{ChunkStore, StoreBatch};
pub use types::*;
pub use vault::{Vault, VaultBuilder};
pub use verification::{VaultVerifier, VerificationReport};
