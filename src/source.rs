// src/source.rs

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::plan::ChunkRange;

/// Something an upload session can read chunks from.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Name announced to the server.
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    /// Reads exactly the bytes of `range`.
    async fn read_chunk(&self, range: ChunkRange) -> io::Result<Bytes>;

    /// Local path of the data, if any. Used to stream the legacy upload.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// A file on the local disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    size: u64,
}

impl FileSource {
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let size = tokio::fs::metadata(&path).await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        Ok(Self { path, name, size })
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_chunk(&self, range: ChunkRange) -> io::Result<Bytes> {
        // Each chunk opens its own handle so concurrent reads never share a cursor.
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.offset)).await?;
        let mut buf = vec![0u8; range.length as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Bytes already held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_chunk(&self, range: ChunkRange) -> io::Result<Bytes> {
        let start = range.offset as usize;
        let end = range.end() as usize;
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "chunk past end of data"));
        }
        Ok(self.data.slice(start..end))
    }
}
