//! Upload Session Store
//!
//! Durable home of session records. The protocol only needs insert, lookup
//! by ID, a range query on creation time, and deletion; the in-memory store
//! here covers tests and single-process deployments, `db::SqliteSessionStore`
//! covers everything else.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use chrono::{DateTime, Utc};

use super::types::UploadSession;
use crate::error::StorageError;

// ============================================================================
// Session Store Trait
// ============================================================================

/// Trait for session persistence backends
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session
    async fn insert(&self, session: &UploadSession) -> Result<(), StorageError>;

    /// Get a session by ID
    async fn find(&self, id: &str) -> Result<Option<UploadSession>, StorageError>;

    /// Sessions created strictly before `cutoff`
    async fn find_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadSession>, StorageError>;

    /// Delete one session, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;

    /// Delete several sessions, returning how many existed
    async fn delete_many(&self, ids: &[String]) -> Result<u64, StorageError>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Sessions held in a shared map
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, UploadSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get session count
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &UploadSession) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<UploadSession>, StorageError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).cloned())
    }

    async fn find_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadSession>, StorageError> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<UploadSession> = sessions
            .values()
            .filter(|s| s.created_at < cutoff)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(id).is_some())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64, StorageError> {
        let mut sessions = self.sessions.write().await;
        let removed = ids.iter().filter(|id| sessions.remove(*id).is_some()).count();
        Ok(removed as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::{FileEntry, FileManifest};

    fn create_test_session() -> UploadSession {
        UploadSession::new(vec![FileEntry {
            field: "file".to_string(),
            manifest: FileManifest {
                name: "test.epub".to_string(),
                size: 1024,
                mime_type: None,
                chunk_count: 1,
                sha256: None,
            },
        }])
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemorySessionStore::new();
        let session = create_test_session();

        store.insert(&session).await.unwrap();

        let found = store.find(&session.id).await.unwrap().unwrap();
        assert_eq!(found, session);
        assert!(store.find("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_created_before() {
        let store = MemorySessionStore::new();

        let mut old = create_test_session();
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        let fresh = create_test_session();

        store.insert(&old).await.unwrap();
        store.insert(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let stale = store.find_created_before(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[tokio::test]
    async fn test_delete_and_delete_many() {
        let store = MemorySessionStore::new();
        let a = create_test_session();
        let b = create_test_session();
        let c = create_test_session();
        for s in [&a, &b, &c] {
            store.insert(s).await.unwrap();
        }

        assert!(store.delete(&a.id).await.unwrap());
        assert!(!store.delete(&a.id).await.unwrap());

        let removed = store
            .delete_many(&[b.id.clone(), c.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.session_count().await, 0);
    }
}
