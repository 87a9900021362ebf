//! Big Upload Client
//!
//! Drives the three protocol phases against a big upload endpoint:
//! declares every file in one `start`, sends the chunks one at a time,
//! then calls `end` and hands back the downstream handler's response.
//! A failed phase ends the transfer with a `ClientError`.
//!
//! Client and server must agree on the chunk size out of band; the protocol
//! only carries chunk counts.

pub mod planner;
pub mod source;

pub use planner::{plan_chunks, PlannedFile, Progress, UploadPlan};
pub use source::{ChunkSource, FileSource, MemorySource};

use reqwest::multipart::{Form, Part};
use reqwest::{header, RequestBuilder, StatusCode};
use thiserror::Error;
use url::Url;

use crate::error::ErrorBody;
use crate::upload::{Phase, StartResponse, DEFAULT_CHUNK_SIZE};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{phase} failed with {status}: {name}: {message}")]
    Server {
        phase: Phase,
        status: StatusCode,
        name: String,
        message: String,
    },

    #[error("Failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("Field {0} appears more than once")]
    DuplicateField(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Extra parameters forwarded to the downstream handler by `end`
#[derive(Debug, Clone, Default)]
pub struct EndParams {
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

/// The end phase response, exactly as the server sent it
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ClientResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// HTTP client for one big upload endpoint
#[derive(Debug, Clone)]
pub struct BigUploadClient {
    http: reqwest::Client,
    url: Url,
    chunk_size: usize,
    token: Option<String>,
}

impl BigUploadClient {
    pub fn new(url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            chunk_size: DEFAULT_CHUNK_SIZE,
            token: None,
        }
    }

    /// Chunk size; must match what the server side expects
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Send `Authorization: Bearer <token>` on every phase
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Upload every source and return the end phase response
    pub async fn upload(
        &self,
        files: &[(&str, &dyn ChunkSource)],
        end: EndParams,
    ) -> Result<ClientResponse> {
        self.upload_with_progress(files, end, |_| {}).await
    }

    /// Upload every source, reporting the acknowledged share after each chunk.
    ///
    /// Stops at the first failing request; nothing is retried.
    pub async fn upload_with_progress<F>(
        &self,
        files: &[(&str, &dyn ChunkSource)],
        end: EndParams,
        mut on_progress: F,
    ) -> Result<ClientResponse>
    where
        F: FnMut(f64) + Send,
    {
        let plan = UploadPlan::new(files, self.chunk_size)?;
        let id = self.start(&plan).await?;

        tracing::debug!(
            session_id = %id,
            files = plan.files.len(),
            chunks = plan.total_chunks(),
            "Started big upload"
        );

        let mut progress = Progress::new(plan.total_bytes);
        for (n, (planned, (_, source))) in plan.files.iter().zip(files).enumerate() {
            for (chunk, range) in planned.chunks.iter().enumerate() {
                let data = source.read_range(range.clone()).await?;
                self.send_chunk(&id, n, chunk, data, &planned.name).await?;

                progress.advance(range.end - range.start);
                on_progress(progress.fraction());
            }
        }

        self.end(&id, end).await
    }

    async fn start(&self, plan: &UploadPlan) -> Result<String> {
        let response = self
            .request(Phase::Start)
            .json(&plan.manifest())
            .send()
            .await?;
        let response = check(Phase::Start, response).await?;

        let started: StartResponse = response.json().await?;
        Ok(started.id)
    }

    async fn send_chunk(&self, id: &str, n: usize, chunk: usize, data: Vec<u8>, name: &str) -> Result<()> {
        let part = Part::bytes(data)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("chunk", part);

        let response = self
            .request(Phase::Chunk)
            .query(&[("id", id.to_string()), ("n", n.to_string()), ("chunk", chunk.to_string())])
            .multipart(form)
            .send()
            .await?;
        check(Phase::Chunk, response).await?;

        Ok(())
    }

    /// A successful end response is returned exactly as the handler produced it
    async fn end(&self, id: &str, params: EndParams) -> Result<ClientResponse> {
        let mut request = self
            .request(Phase::End)
            .query(&[("id", id)])
            .query(&params.query);
        if let Some(body) = &params.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let response = check(Phase::End, response).await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.bytes().await?.to_vec();

        Ok(ClientResponse {
            status,
            content_type,
            body,
        })
    }

    fn request(&self, phase: Phase) -> RequestBuilder {
        let request = self
            .http
            .post(self.url.clone())
            .query(&[("type", phase.as_str())]);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Turn a non-success response into a structured error
async fn check(phase: Phase, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (name, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.name, body.message),
        Err(_) => ("error".to_string(), text),
    };

    Err(ClientError::Server {
        phase,
        status,
        name,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use crate::state::AppState;
    use crate::storage::MemoryBlobBackend;
    use crate::error::UploadError;
    use crate::upload::{
        AllowAll, Authorizer, BearerTokenAuthorizer, BigUpload, CompletedUpload,
        MemorySessionStore, UploadHandler, UploadOptions,
    };
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// Answers with each reassembled file's name, type and contents
    struct EchoHandler;

    #[async_trait::async_trait]
    impl UploadHandler for EchoHandler {
        async fn handle(&self, upload: CompletedUpload) -> crate::error::Result<Response> {
            let mut files = serde_json::Map::new();
            for (field, file) in upload.files.iter() {
                let bytes = tokio::fs::read(file.path()).await.unwrap();
                files.insert(
                    field.to_string(),
                    json!({
                        "name": file.name,
                        "type": file.mime_type,
                        "content": String::from_utf8_lossy(&bytes),
                    }),
                );
            }
            let data = upload.json_body();
            Ok(Json(json!({ "files": files, "query": upload.query, "data": data })).into_response())
        }
    }

    /// Rejects every request for one phase
    struct DenyPhase(Phase);

    #[async_trait::async_trait]
    impl Authorizer for DenyPhase {
        async fn authorize(&self, phase: Phase, _headers: &HeaderMap) -> crate::error::Result<()> {
            if phase == self.0 {
                return Err(UploadError::forbidden("forbidden"));
            }
            Ok(())
        }
    }

    async fn spawn_server(authorizer: Arc<dyn Authorizer>) -> (Url, MemoryBlobBackend, MemorySessionStore) {
        let blobs = MemoryBlobBackend::new();
        let sessions = MemorySessionStore::new();
        let uploads = BigUpload::new(
            Arc::new(blobs.clone()),
            Arc::new(sessions.clone()),
            UploadOptions::default(),
        );
        let state = AppState::new(uploads, authorizer, Arc::new(EchoHandler));
        let app = routes::app(state, 1024 * 1024);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = Url::parse(&format!("http://{}/api/v1/big-upload", addr)).unwrap();
        (url, blobs, sessions)
    }

    #[tokio::test]
    async fn test_upload_round_trip_with_progress() {
        let (url, _blobs, _sessions) = spawn_server(Arc::new(AllowAll)).await;
        let client = BigUploadClient::new(url).with_chunk_size(4);

        let ten = MemorySource::new("ten.txt", b"0123456789".to_vec());
        let empty = MemorySource::new("empty.bin", Vec::new()).with_mime_type("application/x-empty");
        let files: [(&str, &dyn ChunkSource); 2] = [("doc", &ten), ("nothing", &empty)];

        let mut reported = Vec::new();
        let response = client
            .upload_with_progress(
                &files,
                EndParams {
                    query: vec![("album".to_string(), "7".to_string())],
                    body: Some(json!({ "caption": "hi" })),
                },
                |p| reported.push(p),
            )
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));

        let body: Value = response.json().unwrap();
        assert_eq!(body["files"]["doc"]["content"], "0123456789");
        assert_eq!(body["files"]["doc"]["type"], "text/plain");
        assert_eq!(body["files"]["nothing"]["content"], "");
        assert_eq!(body["files"]["nothing"]["type"], "application/x-empty");
        assert_eq!(body["query"], json!({ "album": "7" }));
        assert_eq!(body["data"], json!({ "caption": "hi" }));

        assert_eq!(reported, vec![0.4, 0.8, 1.0]);
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_empty_upload_reports_no_progress() {
        let (url, _blobs, _sessions) = spawn_server(Arc::new(AllowAll)).await;
        let client = BigUploadClient::new(url).with_chunk_size(4);

        let empty = MemorySource::new("empty.bin", Vec::new());
        let files: [(&str, &dyn ChunkSource); 1] = [("file", &empty)];

        let mut calls = 0;
        let response = client
            .upload_with_progress(&files, EndParams::default(), |_| calls += 1)
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_rejected_start_is_structured_error() {
        let (url, _blobs, sessions) = spawn_server(Arc::new(BearerTokenAuthorizer::new("secret"))).await;
        let source = MemorySource::new("a.txt", b"abc".to_vec());
        let files: [(&str, &dyn ChunkSource); 1] = [("file", &source)];

        let err = BigUploadClient::new(url.clone())
            .upload(&files, EndParams::default())
            .await
            .unwrap_err();
        match err {
            ClientError::Server {
                phase,
                status,
                name,
                ..
            } => {
                assert_eq!(phase, Phase::Start);
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(name, "forbidden");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(sessions.session_count().await, 0);

        let response = BigUploadClient::new(url)
            .with_bearer_token("secret")
            .upload(&files, EndParams::default())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_file_source_upload() {
        let (url, _blobs, _sessions) = spawn_server(Arc::new(AllowAll)).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, vec![b'x'; 9]).await.unwrap();

        let source = FileSource::open(&path).await.unwrap();
        let files: [(&str, &dyn ChunkSource); 1] = [("notes", &source)];
        let response = BigUploadClient::new(url)
            .with_chunk_size(2)
            .upload(&files, EndParams::default())
            .await
            .unwrap();

        let body: Value = response.json().unwrap();
        assert_eq!(body["files"]["notes"]["name"], "notes.txt");
        assert_eq!(body["files"]["notes"]["content"], "xxxxxxxxx");
    }

    #[tokio::test]
    async fn test_rejected_end_is_structured_error() {
        let (url, _blobs, sessions) = spawn_server(Arc::new(DenyPhase(Phase::End))).await;
        let source = MemorySource::new("abc.txt", b"abc".to_vec());
        let files: [(&str, &dyn ChunkSource); 1] = [("file", &source)];

        let err = BigUploadClient::new(url)
            .upload(&files, EndParams::default())
            .await
            .unwrap_err();
        match err {
            ClientError::Server {
                phase,
                status,
                name,
                message,
            } => {
                assert_eq!(phase, Phase::End);
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(name, "forbidden");
                assert_eq!(message, "forbidden");
            }
            other => panic!("unexpected error: {}", other),
        }
        // Rejected before reassembly, so nothing was swept
        assert_eq!(sessions.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_chunk_aborts_before_end() {
        let (url, blobs, sessions) = spawn_server(Arc::new(DenyPhase(Phase::Chunk))).await;
        let source = MemorySource::new("abc.txt", b"abcdef".to_vec());
        let files: [(&str, &dyn ChunkSource); 1] = [("file", &source)];

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();
        let mut calls = 0;
        let err = BigUploadClient::new(url)
            .with_http_client(http)
            .with_chunk_size(2)
            .upload_with_progress(&files, EndParams::default(), |_| calls += 1)
            .await
            .unwrap_err();

        match err {
            ClientError::Server { phase, status, .. } => {
                assert_eq!(phase, Phase::Chunk);
                assert_eq!(status, StatusCode::FORBIDDEN);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(calls, 0);
        assert!(blobs.is_empty().await);

        // end never ran, so the session is still there
        assert_eq!(sessions.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_field_sends_nothing() {
        let (url, _blobs, sessions) = spawn_server(Arc::new(AllowAll)).await;
        let a = MemorySource::new("a.txt", b"a".to_vec());
        let b = MemorySource::new("b.txt", b"b".to_vec());
        let files: [(&str, &dyn ChunkSource); 2] = [("file", &a), ("file", &b)];

        let err = BigUploadClient::new(url)
            .upload(&files, EndParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DuplicateField(ref f) if f == "file"));
        assert_eq!(sessions.session_count().await, 0);
    }
}
