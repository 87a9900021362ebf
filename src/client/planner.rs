//! Chunk plan: how each source is cut up and what the manifest says about it

use std::collections::HashSet;
use std::ops::Range;

use serde_json::{Map, Value};

use super::source::ChunkSource;
use super::ClientError;
use crate::upload::chunk_count;

/// Byte ranges of every chunk of a `size`-byte file
pub fn plan_chunks(size: u64, chunk_size: usize) -> Vec<Range<u64>> {
    let step = chunk_size.max(1) as u64;
    (0..chunk_count(size, chunk_size))
        .map(|i| {
            let start = i * step;
            start..(start + step).min(size)
        })
        .collect()
}

/// One file of the plan
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub field: String,
    pub name: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub chunks: Vec<Range<u64>>,
}

/// Every file in upload order, with its chunk boundaries
#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub files: Vec<PlannedFile>,
    pub total_bytes: u64,
}

impl UploadPlan {
    /// Plan `sources` in order; field names must be unique
    pub fn new(sources: &[(&str, &dyn ChunkSource)], chunk_size: usize) -> Result<Self, ClientError> {
        let mut seen = HashSet::new();
        if let Some((field, _)) = sources.iter().find(|(field, _)| !seen.insert(*field)) {
            return Err(ClientError::DuplicateField(field.to_string()));
        }

        let files: Vec<PlannedFile> = sources
            .iter()
            .map(|(field, source)| PlannedFile {
                field: field.to_string(),
                name: source.name().to_string(),
                size: source.size(),
                mime_type: source.mime_type().map(|m| m.to_string()),
                chunks: plan_chunks(source.size(), chunk_size),
            })
            .collect();
        let total_bytes = files.iter().map(|f| f.size).sum();

        Ok(Self { files, total_bytes })
    }

    /// Manifest for the start phase, fields in plan order
    pub fn manifest(&self) -> Value {
        let mut manifest = Map::new();
        for file in &self.files {
            let mut entry = Map::new();
            entry.insert("name".to_string(), Value::from(file.name.clone()));
            entry.insert("size".to_string(), Value::from(file.size));
            if let Some(mime_type) = &file.mime_type {
                entry.insert("type".to_string(), Value::from(mime_type.clone()));
            }
            entry.insert("chunks".to_string(), Value::from(file.chunks.len() as u64));
            manifest.insert(file.field.clone(), Value::Object(entry));
        }
        Value::Object(manifest)
    }

    pub fn total_chunks(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }
}

/// Bytes acknowledged so far against the plan total
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub sent: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Self { sent: 0, total }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.sent = self.sent.saturating_add(bytes);
    }

    /// Share sent, clamped to [0, 1]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.sent as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}
