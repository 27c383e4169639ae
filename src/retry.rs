// src/retry.rs

use crate::error::TransferError;
use std::future::Future;
use tokio::time::Duration;
use tracing::warn;

/// Attempts made for a single chunk operation before giving up.
pub const MAX_CHUNK_RETRIES: u32 = 3;

/// Linear backoff retry schedule for chunk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn upload() -> Self {
        Self {
            max_attempts: MAX_CHUNK_RETRIES,
            base_delay: Duration::from_millis(150),
        }
    }

    pub fn download() -> Self {
        Self {
            max_attempts: MAX_CHUNK_RETRIES,
            base_delay: Duration::from_millis(120),
        }
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Whether a failure may be retried at all.
    pub fn is_retryable(err: &TransferError) -> bool {
        matches!(
            err,
            TransferError::Transient(_) | TransferError::Network(_) | TransferError::Io(_)
        )
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, chunk: usize, mut op: F) -> Result<T, TransferError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !Self::is_retryable(&e) => return Err(e),
                Err(e) if attempt >= attempts => {
                    warn!(chunk, attempt, error = %e, "chunk retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(chunk, attempt, error = %e, "chunk attempt failed, retrying");
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
