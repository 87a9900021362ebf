//! Chunk Receiver (the `chunk` phase)

use std::sync::Arc;
use tempfile::TempPath;

use super::session::SessionStore;
use super::types::ChunkKey;
use crate::error::{Result, StorageError, UploadError};
use crate::storage::BlobBackend;

/// Validates and stores individual chunks
#[derive(Clone)]
pub struct ChunkReceiver {
    blobs: Arc<dyn BlobBackend>,
    sessions: Arc<dyn SessionStore>,
}

impl ChunkReceiver {
    pub fn new(blobs: Arc<dyn BlobBackend>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { blobs, sessions }
    }

    /// Store chunk `chunk` of file `n` in session `id`.
    ///
    /// Re-sending the same key overwrites it. Out-of-range ordinals never
    /// reach the blob backend.
    pub async fn receive(&self, id: &str, n: i64, chunk: i64, data: &[u8]) -> Result<ChunkKey> {
        let session = self
            .sessions
            .find(id)
            .await?
            .ok_or_else(|| UploadError::not_found("upload session not found"))?;

        let file = usize::try_from(n)
            .ok()
            .and_then(|n| session.file(n).map(|entry| (n, entry)));
        let Some((n, entry)) = file else {
            return Err(UploadError::invalid("n out of range"));
        };

        let chunk = u64::try_from(chunk)
            .ok()
            .filter(|c| *c < entry.manifest.chunk_count)
            .ok_or_else(|| UploadError::invalid("chunk out of range"))?;

        let key = ChunkKey::new(&session.id, n, chunk);

        // Scratch copy is removed on drop, whichever way copy_in goes
        let scratch = TempPath::from_path(self.blobs.temp_path());
        tokio::fs::write(&scratch, data)
            .await
            .map_err(StorageError::from)?;
        self.blobs.copy_in(&scratch, &key.blob_key()).await?;
        drop(scratch);

        tracing::debug!(
            session_id = %session.id,
            n = n,
            chunk = chunk,
            bytes = data.len(),
            "Chunk stored"
        );

        Ok(key)
    }
}
