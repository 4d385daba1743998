//! Balancer: the decision loop that divides capacity among registered jobs.
//!
//! The balancer keeps the expensive downstream service as busy as possible
//! without ever exceeding its concurrency ceiling. All round state (the
//! pending-job queue and the token counter) is owned by a single spawned
//! task and mutated only there; registrations and token reclaims reach the
//! loop through channels, never through shared counters.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::allocation::{assign_chunks, normalize_priorities};
use crate::customer::Customer;
use crate::job::Job;
use crate::metrics::{BalancerMetrics, RoundRecord};
use crate::service::ChunkProcessor;

/// Tuning knobs for one balancer instance.
#[derive(Debug, Clone)]
pub struct BalancerConfig {
    /// Hard ceiling on simultaneously in-flight chunks. Zero is valid:
    /// nothing is ever dispatched.
    pub max_chunks: usize,
    /// Capacity of the registration queue. Registering blocks the caller
    /// while the queue is full; this is the only caller-visible
    /// backpressure point.
    pub registration_queue: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_chunks: 100,
            registration_queue: 100,
        }
    }
}

/// Rejected configuration at construction time.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("registration queue capacity must be at least 1")]
    InvalidQueueCapacity,
}

/// Handle to a running balancer. Cloning is cheap; all clones feed the same
/// decision loop.
///
/// The loop task exits on its own once every handle is dropped, the queue
/// has drained, and all outstanding tokens have returned to the pool.
#[derive(Clone)]
pub struct Balancer {
    registrations: mpsc::Sender<Job>,
    #[cfg_attr(not(test), allow(dead_code))]
    grants: mpsc::UnboundedSender<usize>,
    metrics: Arc<BalancerMetrics>,
}

impl Balancer {
    /// Construct the balancer with `config.max_chunks` tokens pre-loaded and
    /// start the decision loop. Must be called from within a Tokio runtime.
    pub fn new(
        service: Arc<dyn ChunkProcessor>,
        config: BalancerConfig,
    ) -> Result<Balancer, BalancerError> {
        if config.registration_queue == 0 {
            return Err(BalancerError::InvalidQueueCapacity);
        }

        let (registrations, jobs_rx) = mpsc::channel(config.registration_queue);
        let (grants, grants_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(BalancerMetrics::new());

        // Seed the pool with the full ceiling; the loop drains this grant on
        // its first wake-up.
        let _ = grants.send(config.max_chunks);

        let decision_loop = DecisionLoop {
            service,
            metrics: metrics.clone(),
            jobs_rx,
            grants_rx,
            grants_tx: grants.clone(),
            ceiling: config.max_chunks,
        };
        tokio::spawn(decision_loop.run());

        Ok(Balancer {
            registrations,
            grants,
            metrics,
        })
    }

    /// Register a customer and start feeding its chunks through the
    /// service. Blocks only while the registration queue is full.
    ///
    /// Cancelling `cancel` stops the customer's chunk production; the job
    /// then completes through the ordinary exhaustion path.
    pub async fn register(&self, cancel: CancellationToken, customer: Arc<dyn Customer>) {
        let job = Job::new(customer, cancel);
        self.metrics.record_registration();
        if self.registrations.send(job).await.is_err() {
            tracing::debug!("decision loop already stopped; registration dropped");
        }
    }

    /// Metrics handle for this balancer.
    pub fn metrics(&self) -> Arc<BalancerMetrics> {
        self.metrics.clone()
    }

    /// Inject extra tokens into the pool, bypassing the ceiling.
    #[cfg(test)]
    pub(crate) fn grant(&self, chunks: usize) {
        let _ = self.grants.send(chunks);
    }
}

/// State owned exclusively by the decision-loop task.
struct DecisionLoop {
    service: Arc<dyn ChunkProcessor>,
    metrics: Arc<BalancerMetrics>,
    jobs_rx: mpsc::Receiver<Job>,
    grants_rx: mpsc::UnboundedReceiver<usize>,
    grants_tx: mpsc::UnboundedSender<usize>,
    ceiling: usize,
}

impl DecisionLoop {
    /// Serialized scheduling loop. One iteration = one round: wait, drain,
    /// allocate, dispatch, prune.
    async fn run(mut self) {
        let mut queue: Vec<Job> = Vec::new();
        let mut chunks: usize = 0;
        let mut registrations_closed = false;

        loop {
            // Block until a token grant or a registration arrives. The
            // grants channel cannot close while this task holds a sender.
            tokio::select! {
                grant = self.grants_rx.recv() => {
                    if let Some(granted) = grant {
                        chunks += granted;
                    }
                }
                job = self.jobs_rx.recv(), if !registrations_closed => {
                    match job {
                        Some(job) => queue.push(job),
                        None => registrations_closed = true,
                    }
                }
            }

            // Absorb whatever else arrived while we were waiting so a burst
            // of registrations or token returns is handled in one round.
            while let Ok(granted) = self.grants_rx.try_recv() {
                chunks += granted;
            }
            if !registrations_closed {
                loop {
                    match self.jobs_rx.try_recv() {
                        Ok(job) => queue.push(job),
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            registrations_closed = true;
                            break;
                        }
                    }
                }
            }

            // Every handle is gone, no work is queued, and the full ceiling
            // is back in the pool: nothing can ever happen again.
            if registrations_closed && queue.is_empty() && chunks >= self.ceiling {
                break;
            }

            if chunks == 0 || queue.is_empty() {
                continue;
            }

            let assignments = divide_chunks(&queue, chunks);
            if !assignments.is_empty() {
                let mut dispatched = 0;
                for (&index, &assigned) in &assignments {
                    queue[index].dispatch(assigned, &self.service, &self.metrics, &self.grants_tx);
                    dispatched += assigned;
                }
                let active_jobs = queue.iter().filter(|job| !job.is_complete()).count();
                tracing::debug!(
                    chunks,
                    active_jobs,
                    assigned_jobs = assignments.len(),
                    "dispatched allocation round"
                );
                self.metrics.record_round(
                    RoundRecord {
                        chunks,
                        active_jobs,
                        assigned_jobs: assignments.len(),
                    },
                    dispatched,
                );
            }

            let before = queue.len();
            queue.retain(|job| !job.is_complete());
            self.metrics.record_completions(before - queue.len());

            if assignments.is_empty() {
                // Every queued job completed between rounds; nothing was
                // dispatched, so the drained tokens stay for the next round.
                continue;
            }

            chunks = 0;
        }

        tracing::debug!("decision loop stopped");
    }
}

/// Group the non-complete jobs by raw priority, normalize to dense ranks,
/// and run the weighted-fair division. Keys of the result are indexes into
/// `queue`; jobs absent from the map get nothing this round.
fn divide_chunks(queue: &[Job], chunks: usize) -> HashMap<usize, usize> {
    let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
    for (index, job) in queue.iter().enumerate() {
        if job.is_complete() {
            continue;
        }
        groups.entry(job.priority()).or_default().push(index);
    }
    if groups.is_empty() {
        return HashMap::new();
    }
    assign_chunks(&normalize_priorities(groups), chunks)
}
