//! Work chunk representation shared by customers, the balancer, and the service.

use std::time::Instant;

/// One opaque unit of work pulled from a customer's workload and fed to the
/// downstream service.
///
/// The timestamp is filled when the chunk is produced so the balancer can
/// compute queueing latency for metrics; the service itself treats the chunk
/// as opaque.
#[derive(Debug, Clone)]
pub struct WorkChunk {
    /// Identifier of the customer that produced this chunk.
    pub customer_id: u64,
    /// Position of the chunk within the producing customer's workload.
    pub sequence: u64,
    /// Capture time used for queueing-latency metrics.
    pub produced_at: Instant,
}

impl WorkChunk {
    /// Create a chunk stamped with the current time.
    pub fn new(customer_id: u64, sequence: u64) -> WorkChunk {
        WorkChunk {
            customer_id,
            sequence,
            produced_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_builder_sets_identifiers() {
        let chunk = WorkChunk::new(7, 3);
        assert_eq!(chunk.customer_id, 7);
        assert_eq!(chunk.sequence, 3);
    }
}
