//! Upload types for the start/chunk/end protocol

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;

// ============================================================================
// Constants
// ============================================================================

/// Default chunk size: 2MB.
///
/// The protocol only carries chunk counts, so clients and servers must agree
/// on this value out of band.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Default age after which an unfinished session is swept: 24 hours
pub const DEFAULT_MAX_AGE_SECONDS: i64 = 24 * 60 * 60;

/// Number of chunks needed for `size` bytes at `chunk_size`
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    size.div_ceil(chunk_size)
}

// ============================================================================
// Protocol Phases
// ============================================================================

/// Phase selected by the `type` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Chunk,
    End,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Chunk => "chunk",
            Self::End => "end",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(Self::Start),
            "chunk" => Some(Self::Chunk),
            "end" => Some(Self::End),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Session Types
// ============================================================================

/// Client-declared description of one file, trusted as-is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Original file name
    pub name: String,

    /// Declared size in bytes
    pub size: u64,

    /// MIME type, if the client knew it
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Number of chunks the client will send
    #[serde(rename = "chunks")]
    pub chunk_count: u64,

    /// Optional hex SHA-256 of the whole file, checked only when verification is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// One field of a session, in manifest order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Form field name the file was declared under
    pub field: String,

    #[serde(flatten)]
    pub manifest: FileManifest,
}

/// Server-side record of one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Opaque session ID, also a bearer capability
    pub id: String,

    /// Files in the order fixed at creation; the index is the file ordinal
    pub files: Vec<FileEntry>,

    /// Session creation time
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new session with a fresh ID
    pub fn new(files: Vec<FileEntry>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            files,
            created_at: Utc::now(),
        }
    }

    /// File at ordinal `n`
    pub fn file(&self, n: usize) -> Option<&FileEntry> {
        self.files.get(n)
    }

    /// Every chunk key implied by the manifest
    pub fn chunk_keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.files.iter().enumerate().flat_map(move |(n, entry)| {
            (0..entry.manifest.chunk_count).map(move |chunk| ChunkKey::new(&self.id, n, chunk))
        })
    }

    /// Total declared chunk count across all files
    pub fn total_chunks(&self) -> u64 {
        self.files.iter().map(|f| f.manifest.chunk_count).sum()
    }
}

/// Address of one stored chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub session_id: String,
    pub file: usize,
    pub chunk: u64,
}

impl ChunkKey {
    pub fn new(session_id: impl Into<String>, file: usize, chunk: u64) -> Self {
        Self {
            session_id: session_id.into(),
            file,
            chunk,
        }
    }

    /// Blob backend key, `{session_id}-{file}-{chunk}`
    pub fn blob_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.session_id, self.file, self.chunk)
    }
}

// ============================================================================
// Reassembled Files
// ============================================================================

/// A reassembled file, shaped like an ordinary upload.
///
/// The file on disk is deleted when this value is dropped, unless the owner
/// moves it somewhere else with [`UploadedFile::persist`] or keeps it with
/// [`UploadedFile::keep`].
#[derive(Debug)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    path: TempPath,
}

impl UploadedFile {
    pub fn new(name: String, mime_type: String, size: u64, path: TempPath) -> Self {
        Self {
            name,
            mime_type,
            size,
            path,
        }
    }

    /// Local path of the reassembled bytes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file to `target`, taking it out of automatic cleanup
    pub fn persist(self, target: impl AsRef<Path>) -> std::io::Result<()> {
        self.path.persist(target).map_err(|e| e.error)
    }

    /// Keep the file where it is and return its path
    pub fn keep(self) -> std::io::Result<std::path::PathBuf> {
        self.path.keep().map_err(|e| e.error)
    }
}

/// Reassembled files keyed by field name, in manifest order
#[derive(Debug, Default)]
pub struct UploadedFiles {
    files: Vec<(String, UploadedFile)>,
}

impl UploadedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, file: UploadedFile) {
        self.files.push((field.into(), file));
    }

    pub fn get(&self, field: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|(f, _)| f == field).map(|(_, file)| file)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UploadedFile)> {
        self.files.iter().map(|(f, file)| (f.as_str(), file))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl IntoIterator for UploadedFiles {
    type Item = (String, UploadedFile);
    type IntoIter = std::vec::IntoIter<(String, UploadedFile)>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

// ============================================================================
// Sweep Results
// ============================================================================

/// Outcome of a sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Session records deleted
    pub sessions: usize,
    /// Chunk blobs actually removed (already-missing ones are not counted)
    pub chunks_removed: usize,
}

// ============================================================================
// Wire Types
// ============================================================================

/// Response to `start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub id: String,
}
