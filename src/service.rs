//! Downstream service contract and the demo implementation.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::chunk::WorkChunk;

/// Failure to process a single work chunk.
///
/// Non-fatal: the dispatching consumer reports it and moves on, the job is
/// not completed because of it, and the concurrency token is still returned
/// to the pool.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The service rejected or failed the chunk.
    #[error("processing failed: {reason}")]
    Failed { reason: String },
    /// Processing was abandoned because the registration was cancelled.
    #[error("processing cancelled")]
    Cancelled,
}

/// The expensive, fragile downstream service.
///
/// One operation: process a single chunk. Latency and failure rate are
/// opaque to the balancer; the only contract is that the balancer never
/// drives more concurrent calls than the configured ceiling.
#[async_trait]
pub trait ChunkProcessor: Send + Sync + 'static {
    /// Process one chunk, observing `cancel` at the implementation's own
    /// discretion.
    async fn process(&self, cancel: CancellationToken, chunk: WorkChunk)
        -> Result<(), ProcessError>;
}

/// Demo service simulating an expensive backend with 0-10 ms of work per
/// chunk.
#[derive(Debug, Default)]
pub struct ExpensiveService;

#[async_trait]
impl ChunkProcessor for ExpensiveService {
    async fn process(
        &self,
        cancel: CancellationToken,
        _chunk: WorkChunk,
    ) -> Result<(), ProcessError> {
        let delay = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(0..10))
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProcessError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
