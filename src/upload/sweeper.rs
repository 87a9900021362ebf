//! Cleanup Sweeper
//!
//! The only garbage collection for abandoned uploads. There is no timer:
//! the full sweep runs at the start of every new session, and a finished
//! session is swept right after its end phase.

use std::sync::Arc;
use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;

use super::session::SessionStore;
use super::types::{SweepStats, UploadSession};
use crate::error::{Result, StorageError};
use crate::storage::BlobBackend;

/// Chunk deletions in flight per session
const REMOVE_CONCURRENCY: usize = 8;

/// Removes session records together with their chunk blobs
#[derive(Clone)]
pub struct Sweeper {
    blobs: Arc<dyn BlobBackend>,
    sessions: Arc<dyn SessionStore>,
    max_age: Duration,
}

impl Sweeper {
    pub fn new(
        blobs: Arc<dyn BlobBackend>,
        sessions: Arc<dyn SessionStore>,
        max_age_seconds: i64,
    ) -> Self {
        Self {
            blobs,
            sessions,
            max_age: Duration::seconds(max_age_seconds),
        }
    }

    /// Sweep every session older than the configured age
    pub async fn sweep_expired(&self) -> Result<SweepStats> {
        let cutoff = Utc::now() - self.max_age;
        let stale = self.sessions.find_created_before(cutoff).await?;
        if stale.is_empty() {
            return Ok(SweepStats::default());
        }

        let mut stats = SweepStats::default();
        for session in &stale {
            stats.chunks_removed += self.remove_chunks(session).await;
        }

        let ids: Vec<String> = stale.iter().map(|s| s.id.clone()).collect();
        stats.sessions = self.sessions.delete_many(&ids).await? as usize;

        tracing::info!(
            sessions = stats.sessions,
            chunks_removed = stats.chunks_removed,
            "Swept expired upload sessions"
        );

        Ok(stats)
    }

    /// Sweep one session; a missing session is not an error
    pub async fn sweep_session(&self, id: &str) -> Result<SweepStats> {
        let Some(session) = self.sessions.find(id).await? else {
            return Ok(SweepStats::default());
        };

        let chunks_removed = self.remove_chunks(&session).await;
        let sessions = usize::from(self.sessions.delete(id).await?);

        tracing::debug!(
            session_id = %id,
            chunks_removed = chunks_removed,
            "Swept upload session"
        );

        Ok(SweepStats {
            sessions,
            chunks_removed,
        })
    }

    /// Run [`Sweeper::sweep_session`] on a detached task
    pub fn spawn_sweep_session(&self, id: String) -> JoinHandle<()> {
        let sweeper = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sweeper.sweep_session(&id).await {
                tracing::warn!(session_id = %id, error = %e, "Failed to sweep upload session");
            }
        })
    }

    async fn remove_chunks(&self, session: &UploadSession) -> usize {
        stream::iter(session.chunk_keys())
            .map(|key| async move {
                match self.blobs.remove(&key.blob_key()).await {
                    Ok(()) => true,
                    // Never uploaded, or already consumed
                    Err(StorageError::ObjectNotFound(_)) => false,
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "Failed to remove chunk");
                        false
                    }
                }
            })
            .buffer_unordered(REMOVE_CONCURRENCY)
            .filter(|removed| futures::future::ready(*removed))
            .count()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobBackend;
    use crate::upload::session::MemorySessionStore;
    use crate::upload::types::{ChunkKey, FileEntry, FileManifest};

    fn session_with_chunks(chunks: u64) -> UploadSession {
        UploadSession::new(vec![FileEntry {
            field: "file".to_string(),
            manifest: FileManifest {
                name: "a.bin".to_string(),
                size: chunks,
                mime_type: None,
                chunk_count: chunks,
                sha256: None,
            },
        }])
    }

    async fn store_all_chunks(blobs: &MemoryBlobBackend, session: &UploadSession) {
        for key in session.chunk_keys() {
            blobs.put(key.blob_key(), vec![1]).await;
        }
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_only_stale_sessions() {
        let blobs = MemoryBlobBackend::new();
        let sessions = MemorySessionStore::new();
        let sweeper = Sweeper::new(Arc::new(blobs.clone()), Arc::new(sessions.clone()), 60);

        let mut stale = session_with_chunks(3);
        stale.created_at = Utc::now() - Duration::seconds(120);
        let fresh = session_with_chunks(2);

        for s in [&stale, &fresh] {
            sessions.insert(s).await.unwrap();
            store_all_chunks(&blobs, s).await;
        }
        // Never-delivered chunk of the stale session is tolerated
        blobs.remove(&ChunkKey::new(&stale.id, 0, 1).blob_key()).await.unwrap();

        let stats = sweeper.sweep_expired().await.unwrap();
        assert_eq!(stats, SweepStats { sessions: 1, chunks_removed: 2 });

        assert!(sessions.find(&stale.id).await.unwrap().is_none());
        assert!(sessions.find(&fresh.id).await.unwrap().is_some());
        assert_eq!(blobs.len().await, 2);
    }

    #[tokio::test]
    async fn test_sweep_session() {
        let blobs = MemoryBlobBackend::new();
        let sessions = MemorySessionStore::new();
        let sweeper = Sweeper::new(Arc::new(blobs.clone()), Arc::new(sessions.clone()), 60);

        let session = session_with_chunks(2);
        sessions.insert(&session).await.unwrap();
        store_all_chunks(&blobs, &session).await;

        let stats = sweeper.sweep_session(&session.id).await.unwrap();
        assert_eq!(stats, SweepStats { sessions: 1, chunks_removed: 2 });
        assert!(blobs.is_empty().await);

        let again = sweeper.sweep_session(&session.id).await.unwrap();
        assert_eq!(again, SweepStats::default());
    }

    #[tokio::test]
    async fn test_spawned_sweep_completes() {
        let blobs = MemoryBlobBackend::new();
        let sessions = MemorySessionStore::new();
        let sweeper = Sweeper::new(Arc::new(blobs.clone()), Arc::new(sessions.clone()), 60);

        let session = session_with_chunks(1);
        sessions.insert(&session).await.unwrap();
        store_all_chunks(&blobs, &session).await;

        sweeper.spawn_sweep_session(session.id.clone()).await.unwrap();
        assert_eq!(sessions.session_count().await, 0);
        assert!(blobs.is_empty().await);
    }
}
