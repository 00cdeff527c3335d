//! Storage abstraction trait
//!
//! This module defines the DocumentStore trait the pipeline depends on.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Invalid file extension: {extension} (allowed: {allowed:?})")]
    InvalidExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Empty file")]
    EmptyFile,

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Save failed: {0}")]
    SaveFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stable reference to a stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Internal key used to reference the file (`invoices/{name}`).
    pub key: String,
    /// URL the file is served under.
    pub url: String,
}

/// Minimal contract the invoice pipeline needs from document storage.
///
/// Implementations validate uploads (extension allow-list, size cap) before
/// persisting, and treat deletes of missing files as a no-op: a lost file
/// must never block deleting the database record that referenced it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Validate and persist an uploaded document, returning its reference.
    async fn save(&self, filename: &str, data: Vec<u8>) -> StorageResult<StoredDocument>;

    /// Read a stored document back by key.
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete a stored document. Missing files are silently ignored.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Absolute filesystem path for a key, for collaborators that read the
    /// document directly (the extraction client).
    fn resolve_path(&self, key: &str) -> StorageResult<PathBuf>;
}
