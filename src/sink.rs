// src/sink.rs

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The user declined to pick a destination.
    #[error("sink acquisition cancelled")]
    Cancelled,
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A destination that accepts writes at absolute offsets.
///
/// Callers never issue two writes concurrently.
#[async_trait]
pub trait PositionalSink: Send {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Makes the written data visible as a complete file.
    async fn commit(self: Box<Self>) -> io::Result<()>;

    /// Discards everything written so far.
    async fn abort(self: Box<Self>) -> io::Result<()>;
}

/// Hands out download destinations.
#[async_trait]
pub trait SinkProvider: Send + Sync {
    /// Whether [`SinkProvider::acquire`] can produce a positional sink at all.
    fn positional_available(&self) -> bool;

    async fn acquire(&self, name: &str, size: u64) -> Result<Box<dyn PositionalSink>, SinkError>;

    /// Plain save path used when the whole resource is fetched in one request.
    fn fallback_path(&self, name: &str) -> Result<PathBuf, SinkError>;
}

/// Returns the temporary path used while `destination` is incomplete.
///
/// e.g. "/path/to/file.zip" becomes "/path/to/file.zip.part".
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// A pre-sized temporary file renamed into place on commit.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    temp: PathBuf,
    destination: PathBuf,
}

impl FileSink {
    pub async fn create(destination: PathBuf, size: u64) -> io::Result<Self> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = part_path(&destination);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp)
            .await?;
        file.set_len(size).await?;
        Ok(Self { file, temp, destination })
    }
}

#[async_trait]
impl PositionalSink for FileSink {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await
    }

    async fn commit(self: Box<Self>) -> io::Result<()> {
        let FileSink { mut file, temp, destination } = *self;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, &destination).await?;
        debug!(path = %destination.display(), "sink committed");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> io::Result<()> {
        let FileSink { file, temp, .. } = *self;
        drop(file);
        tokio::fs::remove_file(&temp).await
    }
}

/// Saves downloads into a directory under their remote names.
#[derive(Debug, Clone)]
pub struct DirectorySinkProvider {
    directory: PathBuf,
    positional: bool,
}

impl DirectorySinkProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            positional: true,
        }
    }

    /// Forces every download through the single-request path.
    pub fn without_positional_writes(mut self) -> Self {
        self.positional = false;
        self
    }

    fn destination(&self, name: &str) -> Result<PathBuf, SinkError> {
        // Only the final component is used so remote names cannot escape the directory.
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| SinkError::Unavailable(format!("invalid file name: {name:?}")))?;
        Ok(self.directory.join(file_name))
    }
}

#[async_trait]
impl SinkProvider for DirectorySinkProvider {
    fn positional_available(&self) -> bool {
        self.positional
    }

    async fn acquire(&self, name: &str, size: u64) -> Result<Box<dyn PositionalSink>, SinkError> {
        if !self.positional {
            return Err(SinkError::Unavailable("positional writes disabled".into()));
        }
        let sink = FileSink::create(self.destination(name)?, size).await?;
        Ok(Box::new(sink))
    }

    fn fallback_path(&self, name: &str) -> Result<PathBuf, SinkError> {
        self.destination(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn out_of_order_writes_land_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let mut sink: Box<dyn PositionalSink> = Box::new(FileSink::create(dest.clone(), 9).await.unwrap());

        sink.write_at(6, b"ghi").await.unwrap();
        sink.write_at(0, b"abc").await.unwrap();
        sink.write_at(3, b"def").await.unwrap();
        assert!(!dest.exists());
        sink.commit().await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"abcdefghi");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn abort_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let mut sink: Box<dyn PositionalSink> = Box::new(FileSink::create(dest.clone(), 4).await.unwrap());
        sink.write_at(0, b"ab").await.unwrap();
        sink.abort().await.unwrap();

        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn provider_strips_directory_components() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirectorySinkProvider::new(dir.path());
        let path = provider.fallback_path("../../etc/passwd").unwrap();
        assert_eq!(path, dir.path().join("passwd"));
        assert!(provider.fallback_path("..").is_err());
    }

    #[tokio::test]
    async fn disabled_provider_refuses_positional_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirectorySinkProvider::new(dir.path()).without_positional_writes();
        assert!(!provider.positional_available());
        assert!(matches!(provider.acquire("a.bin", 1).await, Err(SinkError::Unavailable(_))));
    }
}
