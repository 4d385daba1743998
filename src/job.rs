//! Job lifecycle: one registered customer's unit of scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunk::WorkChunk;
use crate::customer::Customer;
use crate::metrics::BalancerMetrics;
use crate::service::ChunkProcessor;

/// Wrapper around one customer registration.
///
/// The balancer schedules jobs, never customers: the job pins the workload
/// channel produced at registration time (each [`Customer::workload`] call
/// starts a fresh sequence), carries the weight-derived priority, and owns
/// the completion flag.
///
/// Cloning is shallow; all clones observe the same completion state and
/// drain the same workload.
#[derive(Clone)]
pub struct Job {
    customer: Arc<dyn Customer>,
    workload: Arc<Mutex<mpsc::Receiver<WorkChunk>>>,
    cancel: CancellationToken,
    priority: u32,
    complete: Arc<AtomicBool>,
}

impl Job {
    /// Wrap a customer registration. The raw priority is the weight plus
    /// one, reserving zero as "unset" and keeping every priority strictly
    /// positive for the allocator's rank arithmetic.
    pub(crate) fn new(customer: Arc<dyn Customer>, cancel: CancellationToken) -> Job {
        let workload = customer.workload(cancel.clone());
        let priority = customer.weight() + 1;
        Job {
            customer,
            workload: Arc::new(Mutex::new(workload)),
            cancel,
            priority,
            complete: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raw (un-normalized) priority; the decision loop re-ranks the live
    /// priority set every round.
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Whether the workload has been observed exhausted. Monotonic.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Flip the completion flag and stop the customer. Exactly one caller
    /// wins the flag; only that caller invokes [`Customer::stop`], however
    /// many consumers race here.
    pub(crate) fn mark_complete(&self) {
        if self
            .complete
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.customer.stop();
        }
    }

    /// Run `assigned` concurrent consumers against this job, then hand the
    /// freed token count back through `freed_tx` exactly once.
    ///
    /// Returns immediately; the reclaim signal fires asynchronously after
    /// every consumer spawned by this call has finished, never before. Slow
    /// consumers from one round may still be running while later rounds
    /// dispatch.
    pub(crate) fn dispatch(
        &self,
        assigned: usize,
        service: &Arc<dyn ChunkProcessor>,
        metrics: &Arc<BalancerMetrics>,
        freed_tx: &mpsc::UnboundedSender<usize>,
    ) {
        let mut consumers = JoinSet::new();
        for _ in 0..assigned {
            consumers.spawn(consume_one(
                self.clone(),
                service.clone(),
                metrics.clone(),
            ));
        }

        let freed_tx = freed_tx.clone();
        tokio::spawn(async move {
            while consumers.join_next().await.is_some() {}
            // The receiver only closes once the decision loop has exited, at
            // which point the freed tokens have no destination anyway.
            let _ = freed_tx.send(assigned);
        });
    }
}

#[cfg(test)]
impl Job {
    /// Job with a fixed raw priority and an already-closed workload, for
    /// exercising the allocator without a runtime.
    pub(crate) fn stub(priority: u32) -> Job {
        struct NullCustomer(u32);

        impl Customer for NullCustomer {
            fn readiness(&self) -> mpsc::Receiver<std::time::Instant> {
                let (_tx, rx) = mpsc::channel(1);
                rx
            }

            fn workload(&self, _cancel: CancellationToken) -> mpsc::Receiver<WorkChunk> {
                let (_tx, rx) = mpsc::channel(1);
                rx
            }

            fn weight(&self) -> u32 {
                self.0
            }

            fn stop(&self) {}
        }

        assert!(priority >= 1, "raw priorities are weight + 1");
        Job::new(Arc::new(NullCustomer(priority - 1)), CancellationToken::new())
    }
}

/// One consumer: pull a single chunk and feed it downstream.
///
/// An exhausted workload (closed with no item) marks the job complete; a
/// processing failure is reported and otherwise ignored so the token economy
/// is unaffected.
async fn consume_one(job: Job, service: Arc<dyn ChunkProcessor>, metrics: Arc<BalancerMetrics>) {
    if job.is_complete() {
        return;
    }

    // The workload receiver is shared by every consumer of this job across
    // all rounds; holding the lock across recv keeps the pull single-file,
    // like competing receivers on one queue.
    let next = {
        let mut workload = job.workload.lock().await;
        workload.recv().await
    };

    match next {
        Some(chunk) => {
            let customer_id = chunk.customer_id;
            let sequence = chunk.sequence;
            let produced_at = chunk.produced_at;
            match service.process(job.cancel.clone(), chunk).await {
                Ok(()) => {
                    metrics.record_processed();
                    tracing::trace!(
                        customer_id,
                        sequence,
                        latency_us = produced_at.elapsed().as_micros() as u64,
                        "chunk processed"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        customer_id,
                        sequence,
                        error = %err,
                        "chunk processing failed"
                    );
                    metrics.record_process_error();
                }
            }
        }
        None => job.mark_complete(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ProcessError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    struct CountingCustomer {
        chunks: u64,
        stops: Arc<AtomicU32>,
    }

    impl CountingCustomer {
        fn new(chunks: u64) -> (CountingCustomer, Arc<AtomicU32>) {
            let stops = Arc::new(AtomicU32::new(0));
            (
                CountingCustomer {
                    chunks,
                    stops: stops.clone(),
                },
                stops,
            )
        }
    }

    impl Customer for CountingCustomer {
        fn readiness(&self) -> mpsc::Receiver<Instant> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }

        fn workload(&self, _cancel: CancellationToken) -> mpsc::Receiver<WorkChunk> {
            let (tx, rx) = mpsc::channel(1);
            let total = self.chunks;
            tokio::spawn(async move {
                for sequence in 0..total {
                    if tx.send(WorkChunk::new(0, sequence)).await.is_err() {
                        return;
                    }
                }
            });
            rx
        }

        fn weight(&self) -> u32 {
            0
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct OkService;

    #[async_trait]
    impl ChunkProcessor for OkService {
        async fn process(
            &self,
            _cancel: CancellationToken,
            _chunk: WorkChunk,
        ) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    struct FailingService;

    #[async_trait]
    impl ChunkProcessor for FailingService {
        async fn process(
            &self,
            _cancel: CancellationToken,
            _chunk: WorkChunk,
        ) -> Result<(), ProcessError> {
            Err(ProcessError::Failed {
                reason: "always".to_string(),
            })
        }
    }

    fn test_job(chunks: u64) -> (Job, Arc<AtomicU32>) {
        let (customer, stops) = CountingCustomer::new(chunks);
        let job = Job::new(Arc::new(customer), CancellationToken::new());
        (job, stops)
    }

    #[tokio::test]
    async fn concurrent_completion_stops_customer_once() {
        let (job, stops) = test_job(0);

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let job = job.clone();
            tasks.spawn(async move { job.mark_complete() });
        }
        while tasks.join_next().await.is_some() {}

        assert!(job.is_complete());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_frees_assigned_count_after_all_consumers() {
        let (job, stops) = test_job(3);
        let service: Arc<dyn ChunkProcessor> = Arc::new(OkService);
        let metrics = Arc::new(BalancerMetrics::new());
        let (freed_tx, mut freed_rx) = mpsc::unbounded_channel();

        job.dispatch(5, &service, &metrics, &freed_tx);

        // 3 consumers drain the workload, the remaining 2 observe the closed
        // channel and complete the job; the freed count is the full 5.
        assert_eq!(freed_rx.recv().await, Some(5));
        assert!(job.is_complete());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().chunks_processed, 3);
    }

    #[tokio::test]
    async fn dispatch_on_completed_job_is_a_noop_but_still_frees() {
        let (job, stops) = test_job(10);
        job.mark_complete();

        let service: Arc<dyn ChunkProcessor> = Arc::new(OkService);
        let metrics = Arc::new(BalancerMetrics::new());
        let (freed_tx, mut freed_rx) = mpsc::unbounded_channel();

        job.dispatch(4, &service, &metrics, &freed_tx);

        assert_eq!(freed_rx.recv().await, Some(4));
        assert_eq!(metrics.snapshot().chunks_processed, 0);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn processing_errors_do_not_complete_the_job_or_leak_tokens() {
        let (job, _stops) = test_job(4);
        let service: Arc<dyn ChunkProcessor> = Arc::new(FailingService);
        let metrics = Arc::new(BalancerMetrics::new());
        let (freed_tx, mut freed_rx) = mpsc::unbounded_channel();

        job.dispatch(2, &service, &metrics, &freed_tx);

        assert_eq!(freed_rx.recv().await, Some(2));
        assert!(!job.is_complete());
        assert_eq!(metrics.snapshot().process_errors, 2);
        assert_eq!(metrics.snapshot().chunks_processed, 0);
    }
}
