//! Metrics collection for the balancer.
//!
//! Counters are updated lock-free on the dispatch hot path; the last-round
//! record sits behind a mutex because it is written once per round by the
//! decision loop and read only by snapshot callers.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Aggregate counters for one balancer instance.
#[derive(Debug, Default)]
pub struct BalancerMetrics {
    rounds: AtomicU64,
    chunks_dispatched: AtomicU64,
    chunks_processed: AtomicU64,
    process_errors: AtomicU64,
    jobs_registered: AtomicU64,
    jobs_completed: AtomicU64,
    last_round: Mutex<Option<RoundRecord>>,
}

/// Decision-loop view of a single allocation round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundRecord {
    /// Tokens available when the round was computed.
    pub chunks: usize,
    /// Non-complete jobs considered by the allocator.
    pub active_jobs: usize,
    /// Jobs that received a non-zero assignment.
    pub assigned_jobs: usize,
}

/// Point-in-time copy of all counters, serializable for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub rounds: u64,
    pub chunks_dispatched: u64,
    pub chunks_processed: u64,
    pub process_errors: u64,
    pub jobs_registered: u64,
    pub jobs_completed: u64,
    pub last_round: Option<RoundRecord>,
}

impl BalancerMetrics {
    pub fn new() -> BalancerMetrics {
        BalancerMetrics::default()
    }

    /// Record one allocation round and the tokens it handed out.
    pub(crate) fn record_round(&self, record: RoundRecord, dispatched: usize) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
        self.chunks_dispatched
            .fetch_add(dispatched as u64, Ordering::Relaxed);
        *self.last_round.lock() = Some(record);
    }

    pub(crate) fn record_processed(&self) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_process_error(&self) {
        self.process_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_registration(&self) {
        self.jobs_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completions(&self, count: usize) {
        self.jobs_completed.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Copy all counters into a serializable snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            chunks_dispatched: self.chunks_dispatched.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            process_errors: self.process_errors.load(Ordering::Relaxed),
            jobs_registered: self.jobs_registered.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            last_round: self.last_round.lock().clone(),
        }
    }
}
