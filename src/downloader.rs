// src/downloader.rs

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::plan::{ChunkPlan, ChunkRange};
use crate::pool::WorkerPool;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::sink::{part_path, PositionalSink, SinkError, SinkProvider};
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode, Url};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// Lifecycle of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    Probing,
    LegacyFetch,
    Transferring,
    Completed,
    Failed,
}

/// What the metadata probe learned about a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: Url,
    pub total_size: u64,
    pub supports_range: bool,
}

/// A chunk handed to the writer task, acknowledged once it hits the sink.
struct WriteRequest {
    offset: u64,
    data: Bytes,
    done: oneshot::Sender<io::Result<()>>,
}

/// Downloads one remote file, in parallel ranges when the server and the
/// sink provider allow it.
#[derive(Debug)]
pub struct DownloadSession {
    client: Client,
    config: TransferConfig,
    retry: RetryPolicy,
    progress: ProgressReporter,
    state: Mutex<DownloadState>,
}

impl DownloadSession {
    pub fn new(client: Client, config: TransferConfig, progress: ProgressReporter) -> Self {
        Self {
            client,
            config,
            retry: RetryPolicy::download(),
            progress,
            state: Mutex::new(DownloadState::Idle),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn state(&self) -> DownloadState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: DownloadState) {
        *self.state.lock().await = state;
    }

    /// Downloads `url`, saving it as `name` through `provider`.
    ///
    /// A missing resource yields [`TransferError::NotFound`]; a cancelled
    /// destination picker yields [`TransferError::UserCancelled`].
    pub async fn run(&self, url: Url, name: &str, provider: &dyn SinkProvider) -> Result<(), TransferError> {
        let result = self.run_inner(url, name, provider).await;
        match &result {
            Ok(()) => {
                self.set_state(DownloadState::Completed).await;
                self.progress.succeeded();
            }
            Err(e) => {
                self.set_state(DownloadState::Failed).await;
                // A cancelled destination picker ends the transfer without a failure signal.
                if !e.is_silent() {
                    self.progress.failed(e.to_string());
                }
            }
        }
        result
    }

    async fn run_inner(&self, url: Url, name: &str, provider: &dyn SinkProvider) -> Result<(), TransferError> {
        self.set_state(DownloadState::Probing).await;
        let target = self.probe(url).await?;

        if !target.supports_range || target.total_size == 0 || !provider.positional_available() {
            debug!(?target, "parallel download not possible");
            return self.legacy_fetch(&target.url, name, provider).await;
        }

        let sink = match provider.acquire(name, target.total_size).await {
            Ok(sink) => sink,
            Err(SinkError::Cancelled) => {
                info!(file = name, "destination selection cancelled");
                return Err(TransferError::UserCancelled);
            }
            Err(e) => {
                warn!(file = name, error = %e, "could not open destination, fetching whole file");
                return self.legacy_fetch(&target.url, name, provider).await;
            }
        };

        self.set_state(DownloadState::Transferring).await;
        self.fetch_parallel(&target, sink).await
    }

    /// Issues the metadata probe. Any non-success status means the file is gone.
    pub async fn probe(&self, url: Url) -> Result<DownloadTarget, TransferError> {
        let resp = self.client.head(url.clone()).send().await?;
        if !resp.status().is_success() {
            debug!(%url, status = %resp.status(), "probe failed");
            return Err(TransferError::NotFound);
        }
        let headers = resp.headers();
        let total_size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        let supports_range = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("bytes"));
        Ok(DownloadTarget {
            url,
            total_size,
            supports_range,
        })
    }

    async fn fetch_parallel(&self, target: &DownloadTarget, sink: Box<dyn PositionalSink>) -> Result<(), TransferError> {
        let plan = ChunkPlan::new(target.total_size, self.config.chunk_size_bytes);
        let pool = WorkerPool::new(plan, self.config.parallel_chunks);
        info!(
            url = %target.url,
            size = target.total_size,
            chunks = plan.total_chunks(),
            parallel = pool.parallel(),
            "starting parallel download"
        );
        self.progress.started(Some(target.total_size));

        // Fetches run in parallel; writes go through one task, in completion order.
        let (tx, rx) = mpsc::channel::<WriteRequest>(pool.parallel());
        let writer = tokio::spawn(write_loop(sink, rx));

        let fetcher = Arc::new(ChunkFetcher {
            client: self.client.clone(),
            url: target.url.clone(),
            retry: self.retry,
            progress: self.progress.clone(),
            writes: tx,
        });
        let result = pool
            .run(move |range| {
                let fetcher = fetcher.clone();
                async move { fetcher.fetch(range).await }
            })
            .await;

        // Every sender is gone once the pool returns, so the writer drains and exits.
        let sink = writer
            .await
            .map_err(|e| TransferError::Worker(format!("writer task failed: {e}")))?;

        match result {
            Ok(()) => {
                sink.commit().await?;
                info!(url = %target.url, "parallel download completed");
                Ok(())
            }
            Err(e) => {
                warn!(url = %target.url, error = %e, "parallel download failed, discarding output");
                if let Err(abort_err) = sink.abort().await {
                    warn!(error = %abort_err, "could not discard partial download");
                }
                Err(e)
            }
        }
    }

    /// Fetches the whole resource with one request, streaming it to disk.
    async fn legacy_fetch(&self, url: &Url, name: &str, provider: &dyn SinkProvider) -> Result<(), TransferError> {
        self.set_state(DownloadState::LegacyFetch).await;
        self.progress.started(None);
        let destination = provider.fallback_path(name)?;
        info!(%url, path = %destination.display(), "fetching whole file");

        let resp = self.client.get(url.clone()).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Err(TransferError::NotFound),
            status if !status.is_success() => {
                return Err(TransferError::Transient(format!("download returned status {status}")));
            }
            _ => {}
        }

        let temp = part_path(&destination);
        if let Err(e) = stream_to_file(resp, &temp).await {
            if let Err(cleanup_err) = tokio::fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %cleanup_err, "could not remove partial download");
            }
            return Err(e);
        }
        tokio::fs::rename(&temp, &destination).await?;
        Ok(())
    }
}

async fn stream_to_file(resp: reqwest::Response, path: &Path) -> Result<(), TransferError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Applies queued writes one at a time and returns the sink when the queue closes.
async fn write_loop(
    mut sink: Box<dyn PositionalSink>,
    mut rx: mpsc::Receiver<WriteRequest>,
) -> Box<dyn PositionalSink> {
    while let Some(req) = rx.recv().await {
        let result = sink.write_at(req.offset, &req.data).await;
        let _ = req.done.send(result);
    }
    sink
}

/// Shared by the workers of one parallel download.
struct ChunkFetcher {
    client: Client,
    url: Url,
    retry: RetryPolicy,
    progress: ProgressReporter,
    writes: mpsc::Sender<WriteRequest>,
}

impl ChunkFetcher {
    async fn fetch(&self, range: ChunkRange) -> Result<(), TransferError> {
        let data = self
            .retry
            .run(range.index, |attempt| self.get(range, attempt))
            .await?;
        let len = data.len() as u64;

        let (done, written) = oneshot::channel();
        self.writes
            .send(WriteRequest {
                offset: range.offset,
                data,
                done,
            })
            .await
            .map_err(|_| TransferError::Worker("write queue closed".into()))?;
        written
            .await
            .map_err(|_| TransferError::Worker("writer dropped a chunk".into()))??;

        debug!(chunk = range.index, offset = range.offset, len, "chunk written");
        self.progress.chunk_completed(len);
        Ok(())
    }

    async fn get(&self, range: ChunkRange, attempt: u32) -> Result<Bytes, TransferError> {
        let resp = self
            .client
            .get(self.url.clone())
            .header(RANGE, range.range_header())
            .send()
            .await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {
                let data = resp.bytes().await?;
                if data.len() as u64 != range.length {
                    return Err(TransferError::Transient(format!(
                        "chunk {} attempt {attempt}: expected {} bytes, got {}",
                        range.index,
                        range.length,
                        data.len()
                    )));
                }
                Ok(data)
            }
            // The server ignored the range; only usable when reading from the start.
            StatusCode::OK if range.offset == 0 => Ok(resp.bytes().await?),
            status @ (StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST) => Err(TransferError::UnrecoverableChunk {
                index: range.index,
                status: status.as_u16(),
            }),
            status => Err(TransferError::Transient(format!(
                "chunk {} attempt {attempt} returned status {status}",
                range.index
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records writes in memory and checks none overlap in time.
    struct RecordingSink {
        writes: Arc<StdMutex<Vec<(u64, Vec<u8>)>>>,
        busy: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl PositionalSink for RecordingSink {
        async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
            use std::sync::atomic::Ordering;
            assert!(!self.busy.swap(true, Ordering::SeqCst), "concurrent write");
            tokio::task::yield_now().await;
            self.writes.lock().unwrap().push((offset, data.to_vec()));
            self.busy.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn commit(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }

        async fn abort(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn write_loop_serializes_writes() {
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let sink = Box::new(RecordingSink {
            writes: writes.clone(),
            busy: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(write_loop(sink, rx));

        let mut senders = Vec::new();
        for i in 0..16u64 {
            let tx = tx.clone();
            senders.push(tokio::spawn(async move {
                let (done, written) = oneshot::channel();
                tx.send(WriteRequest {
                    offset: i * 4,
                    data: Bytes::from(vec![i as u8; 4]),
                    done,
                })
                .await
                .unwrap();
                written.await.unwrap().unwrap();
            }));
        }
        drop(tx);
        for s in senders {
            s.await.unwrap();
        }
        writer.await.unwrap();

        let mut offsets: Vec<u64> = writes.lock().unwrap().iter().map(|(o, _)| *o).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, (0..16).map(|i| i * 4).collect::<Vec<_>>());
    }
}
