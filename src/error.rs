//! Error types for the chunkvault library
//!
//! This module defines all error types that can occur during vault operations.
//! Errors fall into four broad classes: I/O failures, "not found" conditions
//! (unknown file paths, missing chunk objects), corrupt data (malformed frames
//! or metadata records) and invalid arguments.

use thiserror::Error;

/// Type alias for Results in the chunkvault library
pub type Result<T> = std::result::Result<T, VaultError>;

/// Main error type for all vault operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// I/O errors during file or chunk object operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File path is not known to the metadata index
    #[error("File not found in metadata: {0}")]
    FileNotFound(String),

    /// Chunk object does not exist in the chunk store
    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    /// Stored data failed to decode or verify
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// Metadata record is valid JSON but does not match the index schema
    #[error("Metadata schema mismatch: {0}")]
    MetadataSchema(String),

    /// Invalid argument or configuration value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl VaultError {
    /// Create a corrupt-data error with a custom message
    pub fn corrupt(msg: impl Into<String>) -> Self {
        VaultError::CorruptData(msg.into())
    }

    /// Create an invalid-argument error with a custom message
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        VaultError::InvalidArgument(msg.into())
    }

    /// Check if this error belongs to the "not found" class
    pub fn is_not_found(&self) -> bool {
        match self {
            VaultError::FileNotFound(_) | VaultError::ChunkNotFound(_) => true,
            VaultError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if this error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            VaultError::CorruptData(_) | VaultError::MetadataSchema(_) | VaultError::Json(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            VaultError::FileNotFound(path) => {
                format!("File '{}' is not stored in this vault. Use 'list' to see stored files.", path)
            }
            VaultError::ChunkNotFound(fp) => {
                format!("Chunk {} is missing from the chunk store. Run 'verify' to check the vault.", fp)
            }
            VaultError::MetadataSchema(msg) => {
                format!("The metadata record is unusable ({}). Run without --strict to start from an empty index.", msg)
            }
            _ => self.to_string(),
        }
    }
}
