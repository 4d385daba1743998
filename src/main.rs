// Demo binary: the weighted-fair balancer in front of the demo expensive
// service.
//
// Spawns a set of randomized customers, registers each with the balancer on
// every readiness tick, and runs until the configured duration elapses or
// Ctrl+C arrives. A final metrics snapshot is logged as JSON.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wfa_balancer::{Balancer, BalancerConfig, Customer, ExpensiveService, RandomCustomer};

/// Command-line options parsed from program arguments.
struct CliOptions {
    /// Number of demo customers to spawn (default: random 1..=10).
    customers: usize,
    /// Concurrency ceiling for the downstream service (default: random 0..150).
    max_chunks: usize,
    /// Demo run duration in seconds.
    run_secs: u64,
    /// Registration queue capacity.
    queue_capacity: usize,
}

/// Parse `--flag=value` or `--flag value` style options, falling back to
/// randomized defaults for anything not given.
fn parse_cli_options() -> CliOptions {
    let mut rng = rand::thread_rng();
    let mut options = CliOptions {
        customers: rng.gen_range(1..=10),
        max_chunks: rng.gen_range(0..150),
        run_secs: 5,
        queue_capacity: 100,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (arg, args.next()),
        };
        let Some(value) = value else { continue };
        match key.as_str() {
            "--customers" => {
                if let Ok(parsed) = value.parse() {
                    options.customers = parsed;
                }
            }
            "--max-chunks" => {
                if let Ok(parsed) = value.parse() {
                    options.max_chunks = parsed;
                }
            }
            "--run-secs" => {
                if let Ok(parsed) = value.parse() {
                    options.run_secs = parsed;
                }
            }
            "--queue-capacity" => {
                if let Ok(parsed) = value.parse() {
                    options.queue_capacity = parsed;
                }
            }
            _ => {}
        }
    }
    options
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_cli_options();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(options))
}

async fn run(options: CliOptions) -> Result<(), Box<dyn Error>> {
    let balancer = Balancer::new(
        Arc::new(ExpensiveService),
        BalancerConfig {
            max_chunks: options.max_chunks,
            registration_queue: options.queue_capacity,
        },
    )?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())?;
    }

    info!(
        customers = options.customers,
        max_chunks = options.max_chunks,
        run_secs = options.run_secs,
        "starting balancer demo"
    );

    let mut registration_loops = Vec::with_capacity(options.customers);
    for id in 0..options.customers {
        let customer = Arc::new(RandomCustomer::new(id as u64));
        let balancer = balancer.clone();
        let cancel = cancel.clone();
        registration_loops.push(tokio::spawn(async move {
            let mut ticks = customer.readiness();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    tick = ticks.recv() => {
                        if tick.is_none() {
                            break;
                        }
                        balancer.register(cancel.child_token(), customer.clone()).await;
                    }
                }
            }
            customer.stop();
        }));
    }

    tokio::select! {
        _ = cancel.cancelled() => info!("interrupted, shutting down"),
        _ = tokio::time::sleep(Duration::from_secs(options.run_secs)) => {
            info!("run duration elapsed, shutting down");
        }
    }
    cancel.cancel();

    for handle in registration_loops {
        let _ = handle.await;
    }

    let snapshot = serde_json::to_string(&balancer.metrics().snapshot())?;
    info!(metrics = %snapshot, "balancer demo finished");
    Ok(())
}
