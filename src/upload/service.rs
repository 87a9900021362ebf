//! Wires the protocol components around one blob backend and one session store

use std::sync::Arc;

use super::handler::UploadHandler;
use super::reassembler::{EndRequest, Finalized, Reassembler};
use super::receiver::ChunkReceiver;
use super::registrar::Registrar;
use super::session::SessionStore;
use super::sweeper::Sweeper;
use super::types::{ChunkKey, UploadSession, DEFAULT_MAX_AGE_SECONDS};
use crate::error::Result;
use crate::storage::BlobBackend;

/// Tunables for the upload protocol
#[derive(Debug, Clone, Copy)]
pub struct UploadOptions {
    /// Sessions older than this are swept on the next start
    pub max_age_seconds: i64,

    /// Check reassembled length and digest against the manifest
    pub verify_reassembly: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
            verify_reassembly: false,
        }
    }
}

/// The start/chunk/end protocol over injected storage
#[derive(Clone)]
pub struct BigUpload {
    registrar: Registrar,
    receiver: ChunkReceiver,
    reassembler: Reassembler,
}

impl BigUpload {
    pub fn new(
        blobs: Arc<dyn BlobBackend>,
        sessions: Arc<dyn SessionStore>,
        options: UploadOptions,
    ) -> Self {
        let sweeper = Sweeper::new(blobs.clone(), sessions.clone(), options.max_age_seconds);

        Self {
            registrar: Registrar::new(sessions.clone(), sweeper.clone()),
            receiver: ChunkReceiver::new(blobs.clone(), sessions.clone()),
            reassembler: Reassembler::new(blobs, sessions, sweeper, options.verify_reassembly),
        }
    }

    /// `start`: validate the manifest and open a session
    pub async fn start(&self, manifest: &serde_json::Value) -> Result<UploadSession> {
        self.registrar.start(manifest).await
    }

    /// `chunk`: store one chunk
    pub async fn chunk(&self, id: &str, n: i64, chunk: i64, data: &[u8]) -> Result<ChunkKey> {
        self.receiver.receive(id, n, chunk, data).await
    }

    /// `end`: reassemble and hand off to `handler`
    pub async fn end(&self, id: &str, handler: &dyn UploadHandler, request: EndRequest) -> Result<Finalized> {
        self.reassembler.end(id, handler, request).await
    }
}
