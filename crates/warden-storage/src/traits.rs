//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use warden_core::UploadError;

/// Errors raised by a storage disk
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unknown storage disk '{0}'")]
    UnknownDisk(String),

    #[error("invalid disk name '{0}'")]
    InvalidDiskName(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("cannot prepare disk root {path}: {source}")]
    Root {
        path: String,
        source: std::io::Error,
    },

    #[error("writing {key} failed: {source}")]
    Write {
        key: String,
        source: std::io::Error,
    },

    #[error("deleting {key} failed: {source}")]
    Delete {
        key: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        UploadError::Storage(err.to_string())
    }
}

/// Storage abstraction trait
///
/// A backend is one named disk. Keys come from [`crate::PathLayout`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Copy a local file to `storage_key`, returning the number of bytes written.
    ///
    /// The object only becomes visible under its key once fully written.
    async fn put_file(&self, storage_key: &str, source: &Path) -> StorageResult<u64>;

    /// Write bytes to a storage key (renditions produced by converters).
    async fn put_bytes(&self, storage_key: &str, data: &[u8]) -> StorageResult<()>;

    /// Delete a file by its storage key. Deleting a missing key succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Whether an object is stored under `storage_key`
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Disk identifier this backend serves (matches `UploadProfile::disk`)
    fn disk(&self) -> &str;
}
