// src/upload.rs

use crate::config::{Endpoint, TransferConfig};
use crate::error::TransferError;
use crate::models::{InitRequest, InitResponse, SessionRef};
use crate::plan::{ChunkPlan, ChunkRange};
use crate::pool::WorkerPool;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::source::ChunkSource;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const HEADER_UPLOAD_ID: &str = "X-Upload-ID";
pub const HEADER_CHUNK_INDEX: &str = "X-Chunk-Index";
pub const HEADER_CHUNK_OFFSET: &str = "X-Chunk-Offset";

/// Lifecycle of a chunked upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Initiating,
    Transferring,
    Finalizing,
    Completed,
    Aborted,
}

/// Drives one file through the chunked upload protocol.
#[derive(Debug)]
pub struct UploadSession {
    client: Client,
    endpoint: Endpoint,
    config: TransferConfig,
    retry: RetryPolicy,
    progress: ProgressReporter,
    state: Mutex<UploadState>,
}

/// Everything a chunk worker needs, shared between all workers of a session.
struct ChunkUploader {
    client: Client,
    url: Url,
    upload_id: String,
    source: Arc<dyn ChunkSource>,
    retry: RetryPolicy,
    progress: ProgressReporter,
    uploaded: AtomicU64,
}

impl UploadSession {
    pub fn new(client: Client, endpoint: Endpoint, config: TransferConfig, progress: ProgressReporter) -> Self {
        Self {
            client,
            endpoint,
            config,
            retry: RetryPolicy::upload(),
            progress,
            state: Mutex::new(UploadState::Idle),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn state(&self) -> UploadState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: UploadState) {
        *self.state.lock().await = state;
    }

    /// Uploads `source` and returns once the session is completed or aborted.
    ///
    /// Returns [`TransferError::Unsupported`] without side effects when the
    /// server lacks the chunked protocol; no terminal progress event is
    /// published in that case so the caller's fallback can report instead.
    pub async fn run(&self, source: Arc<dyn ChunkSource>) -> Result<(), TransferError> {
        let result = self.run_inner(source).await;
        match &result {
            Ok(()) => self.progress.succeeded(),
            Err(TransferError::Unsupported) => {}
            Err(e) => self.progress.failed(e.to_string()),
        }
        result
    }

    async fn run_inner(&self, source: Arc<dyn ChunkSource>) -> Result<(), TransferError> {
        let size = source.size();
        if size > self.config.max_file_size_bytes {
            self.set_state(UploadState::Aborted).await;
            return Err(TransferError::SizeExceeded {
                size,
                limit: self.config.max_file_size_bytes,
            });
        }

        self.set_state(UploadState::Initiating).await;
        let (upload_id, plan) = match self.open(source.as_ref()).await {
            Ok(opened) => opened,
            Err(e) => {
                self.set_state(UploadState::Aborted).await;
                return Err(e);
            }
        };

        self.set_state(UploadState::Transferring).await;
        self.progress.started(Some(size));
        let pool = WorkerPool::new(plan, self.config.parallel_chunks);
        info!(
            %upload_id,
            file = source.name(),
            size,
            chunks = plan.total_chunks(),
            parallel = pool.parallel(),
            "upload session opened"
        );

        let uploader = Arc::new(ChunkUploader {
            client: self.client.clone(),
            url: self.endpoint.chunked_chunk.clone(),
            upload_id: upload_id.clone(),
            source,
            retry: self.retry,
            progress: self.progress.clone(),
            uploaded: AtomicU64::new(0),
        });
        let worker_uploader = uploader.clone();
        let result = pool
            .run(move |range| {
                let uploader = worker_uploader.clone();
                async move { uploader.upload(range).await }
            })
            .await;

        if let Err(e) = result {
            warn!(%upload_id, error = %e, "chunk upload failed, aborting session");
            return Err(self.abort(&upload_id, e).await);
        }
        debug!(%upload_id, bytes = uploader.uploaded.load(Ordering::SeqCst), "all chunks uploaded");

        self.set_state(UploadState::Finalizing).await;
        if let Err(e) = self.complete(&upload_id).await {
            return Err(self.abort(&upload_id, e).await);
        }

        self.set_state(UploadState::Completed).await;
        info!(%upload_id, "upload session completed");
        Ok(())
    }

    /// Opens the server session and validates the geometry it returns.
    async fn open(&self, source: &dyn ChunkSource) -> Result<(String, ChunkPlan), TransferError> {
        let request = InitRequest {
            filename: source.name().to_string(),
            size: source.size(),
            chunk_size: self.config.chunk_size_bytes,
        };
        let resp = self
            .client
            .post(self.endpoint.chunked_init.clone())
            .json(&request)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => {
                debug!(status = %resp.status(), "server has no chunked upload endpoint");
                return Err(TransferError::Unsupported);
            }
            status if !status.is_success() => {
                return Err(TransferError::SessionInvalid(format!(
                    "session open rejected with status {status}"
                )));
            }
            _ => {}
        }

        let body: InitResponse = resp
            .json()
            .await
            .map_err(|e| TransferError::SessionInvalid(format!("malformed session response: {e}")))?;

        let Some(upload_id) = body.upload_id.clone().filter(|id| !id.is_empty()) else {
            return Err(TransferError::SessionInvalid("session response has no upload id".into()));
        };
        match validate_geometry(&body, source.size(), self.config.chunk_size_bytes) {
            Ok(plan) => Ok((upload_id, plan)),
            Err(e) => {
                self.release(&upload_id).await;
                Err(e)
            }
        }
    }

    async fn complete(&self, upload_id: &str) -> Result<(), TransferError> {
        let resp = self
            .client
            .post(self.endpoint.chunked_complete.clone())
            .json(&SessionRef {
                upload_id: upload_id.to_string(),
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TransferError::SessionInvalid(format!(
                "completion rejected with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Moves to `Aborted`, releases the server session and hands back `err`.
    async fn abort(&self, upload_id: &str, err: TransferError) -> TransferError {
        self.set_state(UploadState::Aborted).await;
        self.release(upload_id).await;
        err
    }

    /// Best-effort release of the server-side session. Failures are only logged.
    async fn release(&self, upload_id: &str) {
        let result = self
            .client
            .post(self.endpoint.chunked_abort.clone())
            .json(&SessionRef {
                upload_id: upload_id.to_string(),
            })
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => debug!(%upload_id, "upload session released"),
            Ok(resp) => warn!(%upload_id, status = %resp.status(), "session release refused"),
            Err(e) => warn!(%upload_id, error = %e, "session release failed"),
        }
    }
}

/// Checks the server's chunk geometry against the file size.
fn validate_geometry(body: &InitResponse, size: u64, requested_chunk: u64) -> Result<ChunkPlan, TransferError> {
    let chunk_size = match body.chunk_size {
        None => requested_chunk,
        Some(n) if n > 0 => n as u64,
        Some(n) => {
            return Err(TransferError::SessionInvalid(format!("invalid chunk size {n}")));
        }
    };
    let plan = ChunkPlan::new(size, chunk_size);
    if let Some(total) = body.total_chunks {
        if total < 0 || total as u64 != plan.total_chunks() as u64 {
            return Err(TransferError::SessionInvalid(format!(
                "server expects {total} chunks, file needs {}",
                plan.total_chunks()
            )));
        }
    }
    Ok(plan)
}

impl ChunkUploader {
    async fn upload(&self, range: ChunkRange) -> Result<(), TransferError> {
        self.retry
            .run(range.index, |attempt| self.put(range, attempt))
            .await?;
        let uploaded = self.uploaded.fetch_add(range.length, Ordering::SeqCst) + range.length;
        debug!(upload_id = %self.upload_id, chunk = range.index, uploaded, "chunk uploaded");
        self.progress.chunk_completed(range.length);
        Ok(())
    }

    async fn put(&self, range: ChunkRange, attempt: u32) -> Result<(), TransferError> {
        let body = self.source.read_chunk(range).await?;
        let resp = self
            .client
            .put(self.url.clone())
            .header(HEADER_UPLOAD_ID, self.upload_id.as_str())
            .header(HEADER_CHUNK_INDEX, range.index)
            .header(HEADER_CHUNK_OFFSET, range.offset)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Err(TransferError::UnrecoverableChunk {
                index: range.index,
                status: status.as_u16(),
            });
        }
        Err(TransferError::Transient(format!(
            "chunk {} attempt {attempt} returned status {status}",
            range.index
        )))
    }
}
