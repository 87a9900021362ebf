//! Seams to the embedding application: the authorization hook and the
//! downstream handler that receives reassembled files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::types::{Phase, UploadedFiles};
use crate::error::{Result, UploadError};
use crate::storage::BlobBackend;

// ============================================================================
// Authorization
// ============================================================================

/// Called once per request, for every phase, before any phase logic runs
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, phase: Phase, headers: &HeaderMap) -> Result<()>;
}

/// Lets every request through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait::async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _phase: Phase, _headers: &HeaderMap) -> Result<()> {
        Ok(())
    }
}

/// Requires `Authorization: Bearer <token>` matching a static token
#[derive(Debug, Clone)]
pub struct BearerTokenAuthorizer {
    token: String,
}

impl BearerTokenAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait::async_trait]
impl Authorizer for BearerTokenAuthorizer {
    async fn authorize(&self, phase: Phase, headers: &HeaderMap) -> Result<()> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match presented {
            Some(token) if token_matches(token, &self.token) => Ok(()),
            _ => {
                tracing::debug!(phase = %phase, "Rejected upload request without valid token");
                Err(UploadError::forbidden("forbidden"))
            }
        }
    }
}

/// Compare tokens without leaking how many leading bytes match
fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

// ============================================================================
// Downstream Handler
// ============================================================================

/// What the downstream handler receives after a successful end phase
#[derive(Debug)]
pub struct CompletedUpload {
    pub session_id: String,

    /// Reassembled files keyed by field name
    pub files: UploadedFiles,

    /// Query parameters of the end request, minus `type` and `id`
    pub query: BTreeMap<String, String>,

    /// Body of the end request, unchanged
    pub body: Bytes,

    pub content_type: Option<String>,
}

impl CompletedUpload {
    /// Body parsed as JSON, if it is JSON
    pub fn json_body(&self) -> Option<serde_json::Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }
}

/// Consumes reassembled files exactly like an ordinary upload handler would.
///
/// The handler owns the files: anything it neither persists nor keeps is
/// deleted when the `CompletedUpload` is dropped.
#[async_trait::async_trait]
pub trait UploadHandler: Send + Sync {
    async fn handle(&self, upload: CompletedUpload) -> Result<Response>;
}

/// Copies every reassembled file into blob storage under `uploads/{uuid}/{name}`
#[derive(Clone)]
pub struct StoreFilesHandler {
    blobs: Arc<dyn BlobBackend>,
}

impl StoreFilesHandler {
    pub fn new(blobs: Arc<dyn BlobBackend>) -> Self {
        Self { blobs }
    }
}

#[derive(Debug, Serialize)]
struct StoredFile {
    name: String,
    key: String,
    #[serde(rename = "type")]
    mime_type: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct StoredFilesResponse {
    files: BTreeMap<String, StoredFile>,
    query: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

#[async_trait::async_trait]
impl UploadHandler for StoreFilesHandler {
    async fn handle(&self, upload: CompletedUpload) -> Result<Response> {
        let data = upload.json_body();
        let mut files = BTreeMap::new();

        for (field, file) in upload.files.iter() {
            let key = format!("uploads/{}/{}", Uuid::new_v4(), storage_name(&file.name));
            self.blobs.copy_in(file.path(), &key).await?;

            tracing::info!(
                session_id = %upload.session_id,
                field = %field,
                key = %key,
                size = file.size,
                "Stored uploaded file"
            );

            files.insert(
                field.to_string(),
                StoredFile {
                    name: file.name.clone(),
                    key,
                    mime_type: file.mime_type.clone(),
                    size: file.size,
                },
            );
        }

        Ok(Json(StoredFilesResponse {
            files,
            query: upload.query,
            data,
        })
        .into_response())
    }
}

/// Final path component of a client-supplied name
fn storage_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobBackend;
    use crate::upload::types::UploadedFile;
    use axum::http::HeaderValue;
    use tempfile::TempPath;

    #[tokio::test]
    async fn test_bearer_token_authorizer() {
        let auth = BearerTokenAuthorizer::new("secret");

        let mut headers = HeaderMap::new();
        assert!(matches!(
            auth.authorize(Phase::Start, &headers).await,
            Err(UploadError::Forbidden(_))
        ));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(auth.authorize(Phase::Chunk, &headers).await.is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(auth.authorize(Phase::End, &headers).await.is_ok());
    }

    #[test]
    fn test_token_matches_exact_bytes_only() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secreT", "secret"));
        assert!(!token_matches("secret2", "secret"));
        assert!(!token_matches("secre", "secret"));
        assert!(!token_matches("", "secret"));
    }

    #[test]
    fn test_storage_name_strips_directories() {
        assert_eq!(storage_name("../../etc/passwd"), "passwd");
        assert_eq!(storage_name("photo.jpg"), "photo.jpg");
        assert_eq!(storage_name(".."), "upload");
    }

    #[tokio::test]
    async fn test_store_files_handler_copies_and_releases() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let blobs = MemoryBlobBackend::new().with_temp_dir(temp_dir.path());
        let handler = StoreFilesHandler::new(Arc::new(blobs.clone()));

        let path = blobs.temp_path();
        tokio::fs::write(&path, b"payload").await.unwrap();
        let mut files = UploadedFiles::new();
        files.insert(
            "attachment",
            UploadedFile::new(
                "doc.txt".to_string(),
                "text/plain".to_string(),
                7,
                TempPath::from_path(path.clone()),
            ),
        );

        let response = handler
            .handle(CompletedUpload {
                session_id: "s".to_string(),
                files,
                query: BTreeMap::new(),
                body: Bytes::new(),
                content_type: None,
            })
            .await
            .unwrap();

        assert!(response.status().is_success());
        let keys = blobs.keys().await;
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("uploads/") && keys[0].ends_with("/doc.txt"));
        assert_eq!(blobs.get(&keys[0]).await.unwrap(), b"payload");
        // Reassembled file is gone once the upload is dropped
        assert!(!path.exists());
    }
}
