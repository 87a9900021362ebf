//! Session Registrar (the `start` phase)

use std::sync::Arc;
use serde_json::{Map, Value};

use super::session::SessionStore;
use super::sweeper::Sweeper;
use super::types::{FileEntry, FileManifest, UploadSession};
use crate::error::{Result, UploadError};

/// Validates manifests and opens new sessions
#[derive(Clone)]
pub struct Registrar {
    sessions: Arc<dyn SessionStore>,
    sweeper: Sweeper,
}

impl Registrar {
    pub fn new(sessions: Arc<dyn SessionStore>, sweeper: Sweeper) -> Self {
        Self { sessions, sweeper }
    }

    /// Open a session for `raw` and return its ID.
    ///
    /// Stale sessions anywhere in the system are swept first.
    pub async fn start(&self, raw: &Value) -> Result<UploadSession> {
        let files = parse_manifest(raw)?;

        self.sweeper.sweep_expired().await?;

        let session = UploadSession::new(files);
        self.sessions.insert(&session).await?;

        tracing::info!(
            session_id = %session.id,
            files = session.files.len(),
            chunks = session.total_chunks(),
            "Created upload session"
        );

        Ok(session)
    }
}

/// Validate a raw `{ field: { name, size, chunks, type? } }` manifest.
///
/// Field order is taken from the document and becomes the file ordinal.
pub fn parse_manifest(raw: &Value) -> Result<Vec<FileEntry>> {
    let fields = raw
        .as_object()
        .ok_or_else(|| UploadError::invalid("files must be an object"))?;

    fields
        .iter()
        .map(|(field, value)| {
            let info = value
                .as_object()
                .ok_or_else(|| UploadError::invalid(format!("{}: file info must be an object", field)))?;
            Ok(FileEntry {
                field: field.clone(),
                manifest: parse_file(field, info)?,
            })
        })
        .collect()
}

fn parse_file(field: &str, info: &Map<String, Value>) -> Result<FileManifest> {
    let name = match info.get("name") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        _ => {
            return Err(UploadError::invalid(format!(
                "{}: name must be a non-empty string",
                field
            )))
        }
    };

    let size = count(field, info, "size")?;
    let chunk_count = count(field, info, "chunks")?;

    // Every chunk carries at least one byte
    if chunk_count > size || (chunk_count == 0 && size > 0) {
        return Err(UploadError::invalid(format!(
            "{}: {} chunks cannot hold {} bytes",
            field, chunk_count, size
        )));
    }

    Ok(FileManifest {
        name,
        size,
        mime_type: optional_string(field, info, &["type", "mimeType"])?,
        chunk_count,
        sha256: optional_string(field, info, &["sha256"])?,
    })
}

fn count(field: &str, info: &Map<String, Value>, key: &str) -> Result<u64> {
    match info.get(key) {
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            UploadError::invalid(format!("{}: {} must be a non-negative integer", field, key))
        }),
        _ => Err(UploadError::invalid(format!("{}: {} must be a number", field, key))),
    }
}

fn optional_string(field: &str, info: &Map<String, Value>, keys: &[&str]) -> Result<Option<String>> {
    for key in keys {
        match info.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return Ok(Some(s.clone())),
            Some(_) => {
                return Err(UploadError::invalid(format!("{}: {} must be a string", field, key)))
            }
        }
    }
    Ok(None)
}
