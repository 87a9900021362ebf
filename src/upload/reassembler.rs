//! Reassembler (the `end` phase)
//!
//! Concatenates each file's chunks, strictly in ordinal order, into one
//! local temp file per field, then hands the files to the downstream
//! handler as if they had arrived in a single ordinary upload.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::response::Response;
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use super::handler::{CompletedUpload, UploadHandler};
use super::session::SessionStore;
use super::sweeper::Sweeper;
use super::types::{ChunkKey, FileEntry, UploadSession, UploadedFile, UploadedFiles};
use crate::error::{Result, StorageError, UploadError};
use crate::storage::BlobBackend;

/// Extra request data forwarded to the downstream handler
#[derive(Debug, Default, Clone)]
pub struct EndRequest {
    pub query: BTreeMap<String, String>,
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// Result of a successful end phase
pub struct Finalized {
    /// Whatever the downstream handler produced
    pub response: Result<Response>,

    /// Detached cleanup of the session; awaiting it is optional
    pub sweep: JoinHandle<()>,
}

/// Rebuilds files from stored chunks
#[derive(Clone)]
pub struct Reassembler {
    blobs: Arc<dyn BlobBackend>,
    sessions: Arc<dyn SessionStore>,
    sweeper: Sweeper,
    verify: bool,
}

impl Reassembler {
    pub fn new(
        blobs: Arc<dyn BlobBackend>,
        sessions: Arc<dyn SessionStore>,
        sweeper: Sweeper,
        verify: bool,
    ) -> Self {
        Self {
            blobs,
            sessions,
            sweeper,
            verify,
        }
    }

    /// Reassemble session `id` and hand its files to `handler`.
    ///
    /// Fails before the handler runs if the session is unknown or any chunk
    /// is missing. Once the handler has run, the session sweep is scheduled
    /// whatever the handler returned.
    pub async fn end(
        &self,
        id: &str,
        handler: &dyn UploadHandler,
        request: EndRequest,
    ) -> Result<Finalized> {
        let (session, files) = self.reassemble(id).await?;

        let upload = CompletedUpload {
            session_id: session.id.clone(),
            files,
            query: request.query,
            body: request.body,
            content_type: request.content_type,
        };

        let response = handler.handle(upload).await;
        if let Err(e) = &response {
            tracing::warn!(session_id = %session.id, error = %e, "Upload handler failed");
        }

        let sweep = self.sweeper.spawn_sweep_session(session.id);
        Ok(Finalized { response, sweep })
    }

    /// Rebuild every file of session `id`.
    ///
    /// Files built before a failure are deleted when the partial result is
    /// dropped.
    pub async fn reassemble(&self, id: &str) -> Result<(UploadSession, UploadedFiles)> {
        let session = self
            .sessions
            .find(id)
            .await?
            .ok_or_else(|| UploadError::not_found("upload session not found"))?;

        let mut files = UploadedFiles::new();
        for (n, entry) in session.files.iter().enumerate() {
            let file = self.reassemble_file(&session.id, n, entry).await?;
            files.insert(entry.field.clone(), file);
        }

        tracing::info!(
            session_id = %session.id,
            files = files.len(),
            "Reassembled upload"
        );

        Ok((session, files))
    }

    async fn reassemble_file(&self, session_id: &str, n: usize, entry: &FileEntry) -> Result<UploadedFile> {
        let manifest = &entry.manifest;
        let path = TempPath::from_path(self.blobs.temp_path());
        let mut output = tokio::fs::File::create(&path)
            .await
            .map_err(StorageError::from)?;

        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        for chunk in 0..manifest.chunk_count {
            let key = ChunkKey::new(session_id, n, chunk);
            let data = self.read_chunk(&key).await?;

            if self.verify {
                hasher.update(&data);
            }
            output.write_all(&data).await.map_err(StorageError::from)?;
            written += data.len() as u64;
        }

        output.flush().await.map_err(StorageError::from)?;
        drop(output);

        if self.verify {
            verify_file(entry, written, hasher)?;
        }

        let mime_type = manifest.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&manifest.name)
                .first_or_octet_stream()
                .to_string()
        });

        tracing::debug!(
            session_id = %session_id,
            field = %entry.field,
            chunks = manifest.chunk_count,
            bytes = written,
            "Reassembled file"
        );

        Ok(UploadedFile::new(manifest.name.clone(), mime_type, written, path))
    }

    /// Copy one chunk out through a scratch file that never outlives this call
    async fn read_chunk(&self, key: &ChunkKey) -> Result<Vec<u8>> {
        let scratch = TempPath::from_path(self.blobs.temp_path());

        if let Err(e) = self.blobs.copy_out(&key.blob_key(), &scratch).await {
            tracing::warn!(key = %key, error = %e, "Missing chunk during reassembly");
            return Err(e.into());
        }

        let data = tokio::fs::read(&scratch).await.map_err(StorageError::from)?;
        scratch.close().map_err(StorageError::from)?;
        Ok(data)
    }
}

fn verify_file(entry: &FileEntry, written: u64, hasher: Sha256) -> Result<()> {
    let manifest = &entry.manifest;
    if written != manifest.size {
        return Err(UploadError::invalid(format!(
            "{}: reassembled {} bytes, declared {}",
            entry.field, written, manifest.size
        )));
    }

    if let Some(expected) = &manifest.sha256 {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(UploadError::invalid(format!("{}: digest mismatch", entry.field)));
        }
    }

    Ok(())
}
