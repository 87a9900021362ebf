//! In-memory blob storage

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{scratch_path, BlobBackend};
use crate::error::StorageError;

/// Keeps every object in a shared map; scratch files still go to disk
#[derive(Clone)]
pub struct MemoryBlobBackend {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    temp_dir: PathBuf,
}

impl MemoryBlobBackend {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    /// Get a copy of the object at `key`
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// Store bytes directly under `key`
    pub async fn put(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects.write().await.insert(key.into(), data);
    }

    /// All stored keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl Default for MemoryBlobBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlobBackend for MemoryBlobBackend {
    async fn copy_in(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let data = tokio::fs::read(local_path).await?;
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn copy_out(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let data = self
            .get(key)
            .await
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;
        tokio::fs::write(local_path, data).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }

    fn temp_path(&self) -> PathBuf {
        scratch_path(&self.temp_dir)
    }
}
