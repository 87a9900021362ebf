//! Byte sources the client can slice into chunks

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A file-like object: a name, a length, and random access to byte ranges
#[async_trait::async_trait]
pub trait ChunkSource: Send + Sync {
    /// File name reported in the manifest
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    fn mime_type(&self) -> Option<&str> {
        None
    }

    /// Read exactly `range`; callers only ask for ranges within `size()`
    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Vec<u8>>;
}

/// Owned bytes held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    mime_type: Option<String>,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            data: data.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

#[async_trait::async_trait]
impl ChunkSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Vec<u8>> {
        self.data
            .get(range.start as usize..range.end as usize)
            .map(|slice| slice.to_vec())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("range {:?} is outside {} bytes", range, self.data.len()),
                )
            })
    }
}

/// A local file, read range by range
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    size: u64,
    mime_type: Option<String>,
}

impl FileSource {
    /// Open `path`, taking the name from its last component and the MIME
    /// type from its extension
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime_type = mime_guess::from_path(&path).first().map(|m| m.to_string());

        Ok(Self {
            path,
            name,
            size: metadata.len(),
            mime_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl ChunkSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;

        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
