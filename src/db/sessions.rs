//! Upload session database operations

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::StorageError;
use crate::upload::{FileEntry, SessionStore, UploadSession};

/// Ids per DELETE, well under SQLite's bound parameter limit
const DELETE_BATCH_SIZE: usize = 500;

/// Session row as stored; `files` is the ordered manifest as JSON
#[derive(Debug, Clone, sqlx::FromRow)]
struct SessionRow {
    id: String,
    files: String,
    created_at: i64,
}

impl SessionRow {
    fn into_session(self) -> Result<UploadSession, StorageError> {
        let files: Vec<FileEntry> = serde_json::from_str(&self.files)?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at).ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid created_at for session {}", self.id),
            ))
        })?;

        Ok(UploadSession {
            id: self.id,
            files,
            created_at,
        })
    }
}

/// SQLite-backed session store
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize session tables
    pub async fn init(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS big_uploads (
                id TEXT PRIMARY KEY,
                files TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_big_uploads_created ON big_uploads(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: &UploadSession) -> Result<(), StorageError> {
        let files = serde_json::to_string(&session.files)?;

        sqlx::query("INSERT INTO big_uploads (id, files, created_at) VALUES (?, ?, ?)")
            .bind(&session.id)
            .bind(&files)
            .bind(session.created_at.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<UploadSession>, StorageError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, files, created_at FROM big_uploads WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn find_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadSession>, StorageError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, files, created_at
            FROM big_uploads
            WHERE created_at < ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM big_uploads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM big_uploads WHERE id IN (");
            let mut separated = query.separated(", ");
            for id in batch {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            removed += query.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::FileManifest;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_store() -> SqliteSessionStore {
        // One connection, so every query sees the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteSessionStore::new(pool);
        store.init().await.unwrap();
        store
    }

    fn session(fields: &[&str]) -> UploadSession {
        UploadSession::new(
            fields
                .iter()
                .map(|field| FileEntry {
                    field: field.to_string(),
                    manifest: FileManifest {
                        name: format!("{}.bin", field),
                        size: 10,
                        mime_type: Some("application/octet-stream".to_string()),
                        chunk_count: 3,
                        sha256: None,
                    },
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_find_preserves_file_order() {
        let store = setup_test_store().await;
        let created = session(&["zeta", "alpha", "mid"]);
        store.insert(&created).await.unwrap();

        let found = store.find(&created.id).await.unwrap().unwrap();
        let fields: Vec<&str> = found.files.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["zeta", "alpha", "mid"]);
        assert_eq!(found.files, created.files);
        assert_eq!(
            found.created_at.timestamp_millis(),
            created.created_at.timestamp_millis()
        );

        assert!(store.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_created_before() {
        let store = setup_test_store().await;

        let mut old = session(&["file"]);
        old.created_at = Utc::now() - chrono::Duration::hours(3);
        let fresh = session(&["file"]);
        store.insert(&old).await.unwrap();
        store.insert(&fresh).await.unwrap();

        let stale = store
            .find_created_before(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[tokio::test]
    async fn test_delete_and_delete_many() {
        let store = setup_test_store().await;
        let a = session(&["a"]);
        let b = session(&["b"]);
        let c = session(&["c"]);
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
        assert_eq!(store.delete_many(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_many_past_parameter_limit() {
        let store = setup_test_store().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let s = session(&["file"]);
            store.insert(&s).await.unwrap();
            ids.push(s.id);
        }
        ids.extend((0..40_000).map(|i| format!("missing-{}", i)));
        // Real ids at the far end of the list land in the last batch
        ids.swap(0, 39_999);

        assert_eq!(store.delete_many(&ids).await.unwrap(), 3);
        assert!(store.find(&ids[39_999]).await.unwrap().is_none());
    }
}
