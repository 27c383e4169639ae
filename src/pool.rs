// src/pool.rs

use crate::error::TransferError;
use crate::plan::{ChunkPlan, ChunkRange};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// State shared by every worker of one pool run.
struct PoolState {
    /// Next unclaimed chunk index.
    cursor: AtomicUsize,
    /// One-way failure latch.
    failed: AtomicBool,
    /// The failure that set the latch.
    reason: Mutex<Option<TransferError>>,
}

impl PoolState {
    fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Claims the next chunk index. Each index is handed out once.
    fn claim(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::SeqCst)
    }

    /// Sets the latch. Only the first failure is kept.
    fn fail(&self, err: TransferError) {
        if self.failed.swap(true, Ordering::SeqCst) {
            debug!(error = %err, "discarding failure after latch was set");
            return;
        }
        if let Ok(mut slot) = self.reason.lock() {
            *slot = Some(err);
        }
    }

    fn into_result(self) -> Result<(), TransferError> {
        if !self.failed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let reason = self.reason.into_inner().ok().flatten();
        Err(reason.unwrap_or_else(|| TransferError::Worker("pool failed without a reason".into())))
    }
}

/// Runs a chunk operation over every chunk of a plan with bounded parallelism.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    plan: ChunkPlan,
    parallel: usize,
}

impl WorkerPool {
    /// Creates a pool of `max(1, min(configured_parallelism, total_chunks))` workers.
    pub fn new(plan: ChunkPlan, configured_parallelism: usize) -> Self {
        let parallel = configured_parallelism.min(plan.total_chunks()).max(1);
        Self { plan, parallel }
    }

    pub fn parallel(&self) -> usize {
        self.parallel
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Runs `op` for every chunk and returns once all workers have exited.
    ///
    /// The first error stops further claims. Operations already in flight
    /// are allowed to finish; their errors are dropped.
    pub async fn run<F, Fut>(&self, op: F) -> Result<(), TransferError>
    where
        F: Fn(ChunkRange) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TransferError>> + Send + 'static,
    {
        if self.plan.total_chunks() == 0 {
            return Ok(());
        }

        let state = Arc::new(PoolState::new());
        let op = Arc::new(op);
        let mut tasks = Vec::with_capacity(self.parallel);

        for worker in 0..self.parallel {
            let state = state.clone();
            let op = op.clone();
            let plan = self.plan;
            tasks.push(tokio::spawn(async move {
                loop {
                    if state.is_failed() {
                        break;
                    }
                    let Some(range) = plan.chunk(state.claim()) else {
                        break;
                    };
                    // The latch may have been set while claiming.
                    if state.is_failed() {
                        break;
                    }
                    debug!(worker, chunk = range.index, offset = range.offset, "chunk claimed");
                    if let Err(e) = op(range).await {
                        state.fail(e);
                        break;
                    }
                }
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                state.fail(TransferError::Worker(e.to_string()));
            }
        }

        match Arc::try_unwrap(state) {
            Ok(state) => state.into_result(),
            Err(_) => Err(TransferError::Worker("worker state still shared".into())),
        }
    }
}
