//! Blob storage backends
//!
//! Chunks are staged here during an upload, and finished files can be
//! stored here permanently. Every backend moves bytes between a local path
//! and an opaque key:
//!
//! - `LocalBlobBackend`: a directory on disk
//! - `S3BlobBackend`: MinIO, Cloudflare R2, Backblaze B2, and AWS S3
//! - `MemoryBlobBackend`: an in-process map

mod local;
mod memory;
mod s3;

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::StorageError;

pub use local::LocalBlobBackend;
pub use memory::MemoryBlobBackend;
pub use s3::S3BlobBackend;

/// Pluggable object storage, addressed by key
#[async_trait::async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store the contents of `local_path` under `key`, replacing any previous value
    async fn copy_in(&self, local_path: &Path, key: &str) -> Result<(), StorageError>;

    /// Write the object at `key` to `local_path`.
    ///
    /// Fails with `StorageError::ObjectNotFound` if the key does not exist.
    async fn copy_out(&self, key: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Remove the object at `key`.
    ///
    /// Fails with `StorageError::ObjectNotFound` if the key does not exist.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Allocate a fresh local path for scratch files. Nothing is created.
    fn temp_path(&self) -> PathBuf;
}

/// Unique file name under `dir` for scratch and reassembly output
pub(crate) fn scratch_path(dir: &Path) -> PathBuf {
    dir.join(format!("big-upload-{}", Uuid::new_v4()))
}
