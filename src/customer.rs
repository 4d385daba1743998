//! Customer contract and the randomized demo customer used by the binary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::chunk::WorkChunk;

/// A work producer competing for capacity on the downstream service.
///
/// Customers announce readiness on their own schedule and expose their
/// remaining workload as a lazy chunk sequence; the importance weight tells
/// the balancer how much of the capacity ceiling they deserve relative to
/// everyone else. All methods hand out channel endpoints so implementations
/// stay free to produce on whatever task or timer they like.
pub trait Customer: Send + Sync + 'static {
    /// Lazy, restartable stream of readiness ticks. Each call may start a
    /// fresh producer; the balancer embedding decides when a tick turns into
    /// a registration.
    fn readiness(&self) -> mpsc::Receiver<Instant>;

    /// Lazy, finite chunk sequence for one registration. The channel closes
    /// when the workload is exhausted or `cancel` fires; consumers treat
    /// both the same way.
    fn workload(&self, cancel: CancellationToken) -> mpsc::Receiver<WorkChunk>;

    /// Unit-less importance. Higher weight means a larger share of the
    /// capacity ceiling when running alongside other customers.
    fn weight(&self) -> u32;

    /// Release customer-owned resources. The balancer guarantees at most one
    /// call per job lifecycle.
    fn stop(&self);
}

/// Demo customer with randomized weight, workload length, and tick period.
///
/// Mirrors the behavior the balancer is exercised with in production: every
/// readiness tick may trigger a fresh registration, and each registration
/// streams the full workload from the start.
pub struct RandomCustomer {
    id: u64,
    weight: u32,
    chunks: u64,
    tick_every: Duration,
    stopped: Arc<AtomicBool>,
    finished_tx: watch::Sender<bool>,
}

impl RandomCustomer {
    /// Create a customer with random weight (0..10), workload length
    /// (0..100), and tick period (1-3 s).
    pub fn new(id: u64) -> RandomCustomer {
        let mut rng = rand::thread_rng();
        let weight = rng.gen_range(0..10);
        let chunks = rng.gen_range(0..100);
        let tick_every = Duration::from_secs(rng.gen_range(1..=3));
        RandomCustomer::with_params(id, weight, chunks, tick_every)
    }

    /// Deterministic constructor used by tests and benchmarks.
    pub fn with_params(id: u64, weight: u32, chunks: u64, tick_every: Duration) -> RandomCustomer {
        let (finished_tx, _) = watch::channel(false);
        RandomCustomer {
            id,
            weight,
            chunks,
            tick_every,
            stopped: Arc::new(AtomicBool::new(false)),
            finished_tx,
        }
    }

    /// Watch channel flipping to `true` once a registration has streamed the
    /// whole workload.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished_tx.subscribe()
    }

    /// Customer identifier stamped on produced chunks.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Customer for RandomCustomer {
    fn readiness(&self) -> mpsc::Receiver<Instant> {
        let (tx, rx) = mpsc::channel(1);
        let every = self.tick_every;
        let stopped = self.stopped.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first interval tick fires immediately; skip it so ticks
            // arrive on the customer's own schedule.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if stopped.load(Ordering::Acquire) {
                    return;
                }
                if tx.send(Instant::now()).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    fn workload(&self, cancel: CancellationToken) -> mpsc::Receiver<WorkChunk> {
        let (tx, rx) = mpsc::channel(1);
        let id = self.id;
        let total = self.chunks;
        let finished = self.finished_tx.clone();
        tokio::spawn(async move {
            for sequence in 0..total {
                let chunk = WorkChunk::new(id, sequence);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(chunk) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            // send_replace so the exhaustion mark sticks even before anyone
            // has subscribed.
            finished.send_replace(true);
        });
        rx
    }

    fn weight(&self) -> u32 {
        self.weight
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workload_streams_full_length_then_closes() {
        let customer = RandomCustomer::with_params(1, 4, 5, Duration::from_secs(1));
        let mut rx = customer.workload(CancellationToken::new());

        let mut received = 0;
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.customer_id, 1);
            assert_eq!(chunk.sequence, received);
            received += 1;
        }
        assert_eq!(received, 5);
        assert!(*customer.finished().borrow());
    }

    #[tokio::test]
    async fn cancellation_closes_the_workload_early() {
        let customer = RandomCustomer::with_params(2, 1, 100, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let mut rx = customer.workload(cancel.clone());

        let first = rx.recv().await;
        assert!(first.is_some());
        cancel.cancel();

        // Producer observes the cancellation and closes the channel without
        // reporting the workload as finished.
        let mut drained = 0;
        while rx.recv().await.is_some() {
            drained += 1;
            assert!(drained < 100);
        }
        assert!(!*customer.finished().borrow());
    }

    #[tokio::test]
    async fn empty_workload_closes_immediately() {
        let customer = RandomCustomer::with_params(3, 0, 0, Duration::from_secs(1));
        let mut rx = customer.workload(CancellationToken::new());
        assert!(rx.recv().await.is_none());
    }
}
