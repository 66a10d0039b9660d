//! Coordinator binary
//!
//! Runs a scenario (a JSON list of stage specs) against remote workers.
//!
//! Example:
//!   loadstage-coordinator --scenario scenario.json \
//!       --worker 0=127.0.0.1:7001 --worker 1=127.0.0.1:7002 --report report.json
//!
//! Exits with status 1 when a stage ends in `Error`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;

use loadstage::cluster::{Coordinator, RunReport};
use loadstage::core::CoordinatorConfig;
use loadstage::logging::init_logging;
use loadstage::stage::{Scenario, Severity};
use loadstage::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "loadstage-coordinator", about = "Drive loadstage workers through a scenario")]
struct Args {
    /// Scenario file: a JSON list of stage specs
    #[arg(long)]
    scenario: PathBuf,

    /// Worker address as INDEX=HOST:PORT; repeat for every worker
    #[arg(long = "worker", value_parser = parse_worker, required = true)]
    workers: Vec<(usize, String)>,

    /// Maximum time a stage may take on a worker, in seconds
    #[arg(long, default_value_t = 600)]
    stage_timeout_secs: u64,

    /// Timeout of stop and status requests, in seconds
    #[arg(long, default_value_t = 10)]
    request_timeout_secs: u64,

    /// Write the full run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn parse_worker(s: &str) -> Result<(usize, String), String> {
    let (index, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=HOST:PORT, got {}", s))?;
    let index = index
        .parse()
        .map_err(|e| format!("invalid worker index {}: {}", index, e))?;
    Ok((index, addr.to_string()))
}

fn print_summary(report: &RunReport) {
    for stage in &report.stages {
        println!("{:<28} {:<6} {} ms", stage.stage, stage.severity.to_string(), stage.duration_ms);
        for message in &stage.messages {
            println!("    {}", message);
        }
        for (name, summary) in stage.summaries() {
            println!(
                "    {:<52} requests={} errors={} mean={}us p50={}us p99={}us max={}us throughput={:.1}/s",
                name,
                summary.requests,
                summary.errors,
                summary.mean_us,
                summary.p50_us,
                summary.p99_us,
                summary.max_us,
                summary.throughput
            );
        }
    }
    if let Some(index) = report.aborted_at {
        println!("Run aborted at stage {}", index);
    }
}

async fn run(args: Args) -> loadstage::Result<RunReport> {
    let scenario = Scenario::from_path(&args.scenario)?;
    let config = CoordinatorConfig::default()
        .with_stage_timeout(Duration::from_secs(args.stage_timeout_secs))
        .with_request_timeout(Duration::from_secs(args.request_timeout_secs));
    let peers: BTreeMap<usize, String> = args.workers.into_iter().collect();
    let transport = HttpTransport::new(peers, config.request_timeout);

    let report = Coordinator::with_config(transport, config).run(&scenario).await?;
    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_vec_pretty(&report)?)?;
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging("coordinator");
    let args = Args::parse();

    match run(args).await {
        Ok(report) => {
            print_summary(&report);
            if report.severity() == Severity::Error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}
