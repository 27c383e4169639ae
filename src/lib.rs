//! Chunked, parallel file transfer against an HTTP file-sharing server.
//!
//! Uploads split a file into fixed-size chunks pushed through a server-side
//! session; downloads fetch byte ranges concurrently and write them to a
//! positional sink. Both fall back to single-request transfers when the
//! server or environment cannot do better.

pub mod client;
pub mod config;
pub mod downloader;
pub mod error;
pub mod legacy;
pub mod models;
pub mod plan;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod sink;
pub mod source;
pub mod upload;

/// Convenient re-exports of the types most callers need.
pub mod prelude {
    pub use crate::client::TransferClient;
    pub use crate::config::{Endpoint, TransferConfig};
    pub use crate::downloader::{DownloadSession, DownloadState};
    pub use crate::error::TransferError;
    pub use crate::models::{Direction, TransferOutcome};
    pub use crate::plan::{ChunkPlan, ChunkRange};
    pub use crate::progress::{ProgressAggregator, ProgressEvent, ProgressReporter, ProgressSignal};
    pub use crate::sink::{DirectorySinkProvider, PositionalSink, SinkError, SinkProvider};
    pub use crate::source::{ChunkSource, FileSource, MemorySource};
    pub use crate::upload::{UploadSession, UploadState};
}
