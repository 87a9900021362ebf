//! Local filesystem blob storage

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::{scratch_path, BlobBackend};
use crate::error::StorageError;

/// Stores each key as a file below `base_path`
#[derive(Debug, Clone)]
pub struct LocalBlobBackend {
    base_path: PathBuf,
    temp_dir: PathBuf,
}

impl LocalBlobBackend {
    /// Create a backend rooted at `base_path`, using the system temp dir for scratch files
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Use a different directory for scratch files
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid object key: {}", key),
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

fn not_found_as_missing(key: &str, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::ObjectNotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait::async_trait]
impl BlobBackend for LocalBlobBackend {
    async fn copy_in(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::copy(local_path, &target).await?;
        Ok(())
    }

    async fn copy_out(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let source = self.object_path(key)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(StorageError::ObjectNotFound(key.to_string()));
        }

        tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| not_found_as_missing(key, e))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| not_found_as_missing(key, e))
    }

    fn temp_path(&self) -> PathBuf {
        scratch_path(&self.temp_dir)
    }
}
