// src/legacy.rs

use crate::config::Endpoint;
use crate::error::TransferError;
use crate::plan::ChunkRange;
use crate::progress::ProgressReporter;
use crate::source::ChunkSource;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

/// Uploads the whole file in one multipart request, for servers without
/// the chunked protocol. No byte-level progress is reported.
pub async fn upload_legacy(
    client: &Client,
    endpoint: &Endpoint,
    source: &dyn ChunkSource,
    progress: &ProgressReporter,
) -> Result<(), TransferError> {
    progress.started(None);
    let size = source.size();
    info!(file = source.name(), size, "uploading with a single request");

    let part = match source.path() {
        Some(path) => {
            let file = File::open(path).await?;
            Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), size)
        }
        None => {
            let whole = ChunkRange {
                index: 0,
                offset: 0,
                length: size,
            };
            Part::bytes(source.read_chunk(whole).await?.to_vec())
        }
    };
    let part = part
        .file_name(source.name().to_string())
        .mime_str("application/octet-stream")?;

    let resp = client
        .post(endpoint.legacy_upload.clone())
        .multipart(Form::new().part("file", part))
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(TransferError::Transient(format!(
            "upload returned status {}",
            resp.status()
        )));
    }
    Ok(())
}
