//! Weighted-fair admission control for a concurrency-limited downstream
//! service.
//!
//! The balancer multiplexes an arbitrary number of weighted customers onto
//! one expensive, fragile service. A fixed pool of concurrency tokens is
//! re-partitioned every round among the active jobs in proportion to their
//! weights, with starvation exclusion for tiers the round cannot serve
//! proportionally; freed tokens flow back asynchronously and are
//! redistributed the moment a customer finishes or goes idle.

pub mod allocation;
pub mod balancer;
pub mod chunk;
pub mod customer;
pub mod job;
pub mod metrics;
pub mod service;

pub use balancer::{Balancer, BalancerConfig, BalancerError};
pub use chunk::WorkChunk;
pub use customer::{Customer, RandomCustomer};
pub use metrics::{BalancerMetrics, MetricsSnapshot};
pub use service::{ChunkProcessor, ExpensiveService, ProcessError};
