//! Worker binary
//!
//! Runs one worker over the in-memory reference service and serves the
//! coordinator's stage requests over HTTP.
//!
//! Example for a 2-worker cluster:
//!   loadstage-worker --index 0 --count 2 --port 7001
//!   loadstage-worker --index 1 --count 2 --port 7002
//!
//! Each process owns a private in-memory service; nothing is shared between
//! worker processes. Multi-process runs exercise the protocol and measure
//! throughput, but cluster-wide checks do not hold across them: a
//! `StrongCounterTest` over two processes sees the same values on both
//! workers and reports them as duplicates. Run cluster-wide consistency
//! tests with `--count 1`, or in one process through `TestCluster`.
//!
//! Endpoints:
//!   POST /worker/stage   - Execute a stage and return its acknowledgement
//!   POST /worker/stop    - Stop the stressors of the running stage
//!   GET  /worker/status  - Current stage and number of executed stages

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use loadstage::adapter::{MemoryService, MemoryServiceConfig};
use loadstage::cluster::Worker;
use loadstage::core::WorkerConfig;
use loadstage::logging::init_logging;
use loadstage::transport::create_router;

#[derive(Parser, Debug)]
#[command(name = "loadstage-worker", about = "Run a loadstage worker")]
struct Args {
    /// Index of this worker (0-based)
    #[arg(long)]
    index: usize,

    /// Total number of workers in the cluster
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Port serving the coordinator's requests
    #[arg(long, default_value_t = 7001)]
    port: u16,

    /// Simulated latency of every cache call, in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Initial socket timeout of the service, in milliseconds
    #[arg(long, default_value_t = 60_000)]
    socket_timeout_ms: u64,

    /// Minimum gap between stressor progress log lines, in seconds
    #[arg(long, default_value_t = 20)]
    progress_interval_secs: u64,
}

#[tokio::main]
async fn main() -> loadstage::Result<()> {
    init_logging("worker");
    let args = Args::parse();

    let service = MemoryService::new(
        MemoryServiceConfig::default()
            .with_latency(Duration::from_millis(args.latency_ms))
            .with_socket_timeout(Duration::from_millis(args.socket_timeout_ms)),
    );
    let config = WorkerConfig::new(args.index, args.count)
        .with_progress_interval(Duration::from_secs(args.progress_interval_secs));
    let handle = Worker::new(config, service.capabilities()).start();

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(worker = args.index, %addr, "Worker listening");

    let router = create_router(handle.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    handle.shutdown().await;
    Ok(())
}
