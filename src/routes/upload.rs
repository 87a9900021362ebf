//! Upload Routes
//!
//! One POST endpoint for the chunked upload protocol; the phase comes from
//! the `type` query parameter:
//! - `?type=start` - JSON manifest in, `{ id }` out
//! - `?type=chunk&id&n&chunk` - one multipart file part in, `{}` out
//! - `?type=end&id&...` - reassemble; response comes from the downstream handler

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::error::{Result, UploadError};
use crate::state::AppState;
use crate::upload::{EndRequest, Phase, StartResponse};

/// Create the upload router; `max_body_bytes` bounds a single request
pub fn router(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/", post(big_upload))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST ?type=start|chunk|end
async fn big_upload(
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    request: Request,
) -> Result<Response> {
    let phase = query
        .get("type")
        .and_then(|t| Phase::parse(t))
        .ok_or_else(|| UploadError::invalid("type must be one of start, chunk, end"))?;

    state.authorizer().authorize(phase, &headers).await?;

    match phase {
        Phase::Start => start(&state, request).await,
        Phase::Chunk => chunk(&state, &query, request).await,
        Phase::End => end(&state, query, &headers, request).await,
    }
}

async fn start(state: &AppState, request: Request) -> Result<Response> {
    let body = Bytes::from_request(request, state)
        .await
        .map_err(|e| UploadError::invalid(e.body_text()))?;
    let manifest: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| UploadError::invalid(format!("invalid manifest: {}", e)))?;

    let session = state.uploads().start(&manifest).await?;

    Ok(Json(StartResponse { id: session.id }).into_response())
}

async fn chunk(state: &AppState, query: &BTreeMap<String, String>, request: Request) -> Result<Response> {
    let id = required(query, "id")?;
    let n = integer(query, "n")?;
    let chunk = integer(query, "chunk")?;

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| UploadError::invalid(e.body_text()))?;

    let mut payload: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::invalid(format!("Failed to read upload: {}", e)))?
    {
        // Plain form fields ride along; only file parts count
        if field.file_name().is_none() {
            continue;
        }
        if payload.is_some() {
            return Err(UploadError::invalid("exactly one chunk file is required"));
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| UploadError::invalid(format!("Failed to read chunk data: {}", e)))?;
        payload = Some(data);
    }

    let payload = payload.ok_or_else(|| UploadError::invalid("exactly one chunk file is required"))?;
    state.uploads().chunk(id, n, chunk, &payload).await?;

    Ok(Json(serde_json::json!({})).into_response())
}

async fn end(
    state: &AppState,
    mut query: BTreeMap<String, String>,
    headers: &HeaderMap,
    request: Request,
) -> Result<Response> {
    let id = required(&query, "id")?.to_string();
    query.remove("type");
    query.remove("id");

    let body = Bytes::from_request(request, state)
        .await
        .map_err(|e| UploadError::invalid(e.body_text()))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let finalized = state
        .uploads()
        .end(
            &id,
            state.handler(),
            EndRequest {
                query,
                body,
                content_type,
            },
        )
        .await?;

    // Sweep stays detached; the response does not wait for it
    drop(finalized.sweep);
    finalized.response
}

// ============================================================================
// Helpers
// ============================================================================

fn required<'a>(query: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    query
        .get(key)
        .map(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| UploadError::invalid(format!("{} is required", key)))
}

fn integer(query: &BTreeMap<String, String>, key: &str) -> Result<i64> {
    required(query, key)?
        .parse()
        .map_err(|_| UploadError::invalid(format!("{} must be an integer", key)))
}

// ============================================================================
// Tests
// ============================================================================
