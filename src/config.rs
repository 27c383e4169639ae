// src/config.rs

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_PARALLEL_CHUNKS: usize = 8;
pub const MAX_PARALLEL_CHUNKS: usize = 64;
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

/// Limits applied to every transfer. Resolved once, then copied into sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    pub parallel_chunks: usize,
    pub chunk_size_bytes: u64,
    pub max_file_size_bytes: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            parallel_chunks: DEFAULT_PARALLEL_CHUNKS,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// The remote settings document. Fields are loosely typed on purpose:
/// each one is validated on its own and ignored if unusable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(default)]
    pub parallel_chunks: Option<Value>,
    #[serde(default)]
    pub chunk_size_bytes: Option<Value>,
    #[serde(default)]
    pub max_file_size_bytes: Option<Value>,
}

/// Returns the value as a finite, strictly positive number.
fn positive_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n > 0.0).then_some(n)
}

impl TransferConfig {
    /// Applies every valid field of `settings` on top of the defaults.
    pub fn from_settings(settings: &SettingsDocument) -> Self {
        let mut config = Self::default();
        if let Some(n) = positive_number(settings.parallel_chunks.as_ref()) {
            config.parallel_chunks = (n.floor() as usize).clamp(1, MAX_PARALLEL_CHUNKS);
        }
        if let Some(n) = positive_number(settings.chunk_size_bytes.as_ref()) {
            config.chunk_size_bytes = (n.floor() as u64).max(MIN_CHUNK_SIZE);
        }
        if let Some(n) = positive_number(settings.max_file_size_bytes.as_ref()) {
            config.max_file_size_bytes = (n.floor() as u64).max(1);
        }
        config
    }

    /// Fetches the server's settings document, falling back to defaults on any failure.
    pub async fn fetch(client: &Client, endpoint: &Endpoint) -> Self {
        match Self::try_fetch(client, endpoint).await {
            Ok(config) => {
                debug!(?config, "transfer settings resolved");
                config
            }
            Err(e) => {
                warn!(error = %e, "could not load transfer settings, using defaults");
                Self::default()
            }
        }
    }

    async fn try_fetch(client: &Client, endpoint: &Endpoint) -> Result<Self, reqwest::Error> {
        let settings: SettingsDocument = client
            .get(endpoint.settings.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Self::from_settings(&settings))
    }
}

/// The server base URL and the protocol paths derived from it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base: Url,
    pub(crate) settings: Url,
    pub(crate) files: Url,
    pub(crate) chunked_init: Url,
    pub(crate) chunked_chunk: Url,
    pub(crate) chunked_complete: Url,
    pub(crate) chunked_abort: Url,
    pub(crate) legacy_upload: Url,
    download: Url,
}

impl Endpoint {
    pub fn new(mut base: Url) -> Result<Self, ConfigError> {
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(base.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| ConfigError::InvalidUrl(format!("{base}{path}: {e}")))
        };
        Ok(Self {
            settings: join("settings/")?,
            files: join("files/")?,
            chunked_init: join("upload/chunked/init")?,
            chunked_chunk: join("upload/chunked/chunk")?,
            chunked_complete: join("upload/chunked/complete")?,
            chunked_abort: join("upload/chunked/abort")?,
            legacy_upload: join("upload/")?,
            download: join("download/")?,
            base,
        })
    }

    pub fn parse(base: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(base).map_err(|e| ConfigError::InvalidUrl(format!("{base}: {e}")))?;
        Self::new(url)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL of a stored file. The name is encoded as a single path segment.
    pub fn download_url(&self, name: &str) -> Result<Url, ConfigError> {
        let mut url = self.download.clone();
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push(name);
        Ok(url)
    }
}
