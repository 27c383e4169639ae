// src/error.rs

use crate::config::ConfigError;
use crate::models::Direction;
use crate::sink::SinkError;
use thiserror::Error;

/// Errors produced by upload and download sessions.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The server has no chunked protocol; the caller should use the legacy path.
    #[error("server does not support chunked transfers")]
    Unsupported,
    /// A network failure or malformed response. Retried at chunk level.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("chunk {index} rejected by server with status {status}")]
    UnrecoverableChunk { index: usize, status: u16 },
    #[error("invalid session: {0}")]
    SessionInvalid(String),
    #[error("file size {size} exceeds the limit of {limit} bytes")]
    SizeExceeded { size: u64, limit: u64 },
    #[error("transfer cancelled by user")]
    UserCancelled,
    /// The download target no longer exists on the server.
    #[error("resource not found")]
    NotFound,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl TransferError {
    /// True when nothing should be shown to the user for this failure.
    pub fn is_silent(&self) -> bool {
        matches!(self, TransferError::Unsupported | TransferError::UserCancelled)
    }

    /// True when the failure means the remote catalog is stale.
    pub fn is_missing(&self) -> bool {
        matches!(self, TransferError::NotFound)
    }

    /// Generic message for the user, or `None` for silent failures.
    pub fn user_message(&self, direction: Direction) -> Option<&'static str> {
        if self.is_silent() {
            return None;
        }
        Some(match direction {
            Direction::Upload => "Could not upload the file.",
            Direction::Download => "Could not download the file.",
        })
    }
}

impl From<SinkError> for TransferError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Cancelled => TransferError::UserCancelled,
            SinkError::Unavailable(reason) => TransferError::Transient(reason),
            SinkError::Io(e) => TransferError::Io(e),
        }
    }
}
