// src/client.rs

use crate::config::{Endpoint, TransferConfig};
use crate::downloader::DownloadSession;
use crate::error::TransferError;
use crate::legacy::upload_legacy;
use crate::models::{Direction, FileList, TransferOutcome};
use crate::progress::ProgressReporter;
use crate::sink::SinkProvider;
use crate::source::ChunkSource;
use crate::upload::UploadSession;
use reqwest::Client;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for UI collaborators: one per server, shared by every transfer.
///
/// Each `upload` or `download` call gets its own session, so transfers of
/// different files never share chunk state.
#[derive(Debug, Clone)]
pub struct TransferClient {
    http: Client,
    endpoint: Endpoint,
    config: TransferConfig,
}

impl TransferClient {
    /// Builds the shared HTTP client.
    pub fn http_client() -> Result<Client, TransferError> {
        let client = Client::builder()
            .user_agent(concat!("chunkwise/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(client)
    }

    /// Creates a client and resolves the transfer limits from the server.
    pub async fn connect(endpoint: Endpoint) -> Result<Self, TransferError> {
        let http = Self::http_client()?;
        let config = TransferConfig::fetch(&http, &endpoint).await;
        info!(server = %endpoint.base(), ?config, "transfer client ready");
        Ok(Self::with_config(http, endpoint, config))
    }

    pub fn with_config(http: Client, endpoint: Endpoint, config: TransferConfig) -> Self {
        Self { http, endpoint, config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Uploads one file, falling back to a single request when the server
    /// has no chunked protocol.
    pub async fn upload(&self, source: Arc<dyn ChunkSource>, progress: ProgressReporter) -> TransferOutcome {
        let session = UploadSession::new(
            self.http.clone(),
            self.endpoint.clone(),
            self.config,
            progress.clone(),
        );
        let result = match session.run(source.clone()).await {
            Err(TransferError::Unsupported) => {
                info!(file = source.name(), "chunked upload unsupported, using legacy upload");
                let result = upload_legacy(&self.http, &self.endpoint, source.as_ref(), &progress).await;
                match &result {
                    Ok(()) => progress.succeeded(),
                    Err(e) => progress.failed(e.to_string()),
                }
                result
            }
            other => other,
        };
        log_failure(source.name(), Direction::Upload, &result);
        result.into()
    }

    /// Downloads the stored file `name` into a sink from `provider`.
    pub async fn download(&self, name: &str, provider: &dyn SinkProvider, progress: ProgressReporter) -> TransferOutcome {
        let url = match self.endpoint.download_url(name) {
            Ok(url) => url,
            Err(e) => {
                progress.failed(e.to_string());
                return TransferOutcome::Failed(e.into());
            }
        };
        let session = DownloadSession::new(self.http.clone(), self.config, progress);
        let result = session.run(url, name, provider).await;
        log_failure(name, Direction::Download, &result);
        result.into()
    }

    /// Lists the files stored on the server.
    pub async fn list_files(&self) -> Result<Vec<String>, TransferError> {
        let list: FileList = self
            .http
            .get(self.endpoint.files.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.files)
    }
}

fn log_failure(name: &str, direction: Direction, result: &Result<(), TransferError>) {
    let Err(e) = result else {
        return;
    };
    if e.is_missing() {
        warn!(file = name, "file no longer exists on the server, catalog is stale");
    } else if let Some(message) = e.user_message(direction) {
        warn!(file = name, error = %e, "{message}");
    }
}
