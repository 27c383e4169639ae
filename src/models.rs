// src/models.rs

use crate::error::TransferError;
use serde::{Deserialize, Serialize};

/// Which way bytes flow for a transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Terminal result of one `upload` or `download` call.
#[derive(Debug)]
pub enum TransferOutcome {
    Success,
    Failed(TransferError),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success)
    }

    pub fn error(&self) -> Option<&TransferError> {
        match self {
            TransferOutcome::Success => None,
            TransferOutcome::Failed(e) => Some(e),
        }
    }
}

impl From<Result<(), TransferError>> for TransferOutcome {
    fn from(result: Result<(), TransferError>) -> Self {
        match result {
            Ok(()) => TransferOutcome::Success,
            Err(e) => TransferOutcome::Failed(e),
        }
    }
}

/// Body of `POST /upload/chunked/init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub filename: String,
    pub size: u64,
    pub chunk_size: u64,
}

/// Response to a session open. Every field is optional on the wire and
/// validated by the upload session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitResponse {
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<i64>,
    #[serde(default)]
    pub total_chunks: Option<i64>,
}

/// Body of the `complete` and `abort` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRef {
    pub upload_id: String,
}

/// Response of `GET /files/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<String>,
}
