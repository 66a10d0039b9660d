//! Coordinator - drives every worker through the stages of a scenario

use std::collections::BTreeMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use crate::core::{CoordinatorConfig, OperationSummary, Statistics, TimelineSnapshot};
use crate::error::Result;
use crate::stage::lifecycle::CollectTimelineStage;
use crate::stage::{AckPayload, Scenario, Severity, StageAck, StageCatalog, StageSpec};
use crate::transport::{TransportError, WorkerTransport};

/// Outcome of one stage over all workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub severity: Severity,
    pub messages: Vec<String>,
    /// Statistics of all workers merged; `None` for stages without load
    pub statistics: Option<Statistics>,
    /// Every worker's acknowledgement, ordered by worker index
    pub acks: Vec<StageAck>,
    pub duration_ms: u64,
}

impl StageReport {
    /// Statistics of each worker that reported any
    pub fn worker_statistics(&self) -> impl Iterator<Item = (usize, &Statistics)> {
        self.acks
            .iter()
            .filter_map(|ack| ack.payload.statistics().map(|s| (ack.worker_index, s)))
    }

    /// Per-operation summaries of the merged statistics
    pub fn summaries(&self) -> BTreeMap<String, OperationSummary> {
        self.statistics
            .as_ref()
            .map(|statistics| statistics.summaries())
            .unwrap_or_default()
    }
}

/// Outcome of a whole scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    /// Index of the stage whose `Error` halted the run
    pub aborted_at: Option<usize>,
    /// Timelines collected from the workers at the end of the run
    pub timelines: Vec<TimelineSnapshot>,
}

impl RunReport {
    /// Worst severity over all executed stages
    pub fn severity(&self) -> Severity {
        self.stages
            .iter()
            .map(|stage| stage.severity)
            .max()
            .unwrap_or(Severity::Ok)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted_at.is_some()
    }
}

/// Coordinator broadcasting stages over a worker transport
pub struct Coordinator<T: WorkerTransport> {
    transport: T,
    catalog: StageCatalog,
    config: CoordinatorConfig,
}

impl<T: WorkerTransport> Coordinator<T> {
    /// Create a coordinator with default config
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, CoordinatorConfig::default())
    }

    pub fn with_config(transport: T, config: CoordinatorConfig) -> Self {
        crate::adapter::register_builtin_operations();
        Self {
            transport,
            catalog: StageCatalog::builtin(),
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run every stage of the scenario in order
    ///
    /// All stage specs are validated before the first one is broadcast. A
    /// stage ending in `Error` halts the run; the timelines are collected
    /// either way.
    pub async fn run(&self, scenario: &Scenario) -> Result<RunReport> {
        for spec in &scenario.stages {
            self.catalog.build(spec)?;
        }

        let mut report = RunReport::default();
        for (index, spec) in scenario.stages.iter().enumerate() {
            let stage = self.run_stage(spec).await?;
            let halts = stage.severity.halts_run();
            report.stages.push(stage);
            if halts {
                error!(stage = %spec.stage_type, index, "Stage failed with an error, aborting the run");
                report.aborted_at = Some(index);
                break;
            }
        }

        report.timelines = self.collect_timelines().await;
        info!(
            stages = report.stages.len(),
            severity = %report.severity(),
            aborted = report.is_aborted(),
            "Run finished"
        );
        Ok(report)
    }

    /// Broadcast one stage to every worker and judge the acknowledgements
    pub async fn run_stage(&self, spec: &StageSpec) -> Result<StageReport> {
        let stage = self.catalog.build(spec)?;
        let started = Instant::now();
        info!(stage = %spec.stage_type, workers = self.transport.workers().len(), "Starting stage");

        let requests = self
            .transport
            .workers()
            .into_iter()
            .map(|worker| self.execute_on(worker, spec));
        let mut acks = join_all(requests).await;
        acks.sort_by_key(|ack| ack.worker_index);

        let result = stage.process_acks(&acks);
        let statistics = merge_statistics(&acks);
        for message in &result.messages {
            warn!(stage = %spec.stage_type, "{}", message);
        }
        if let Some(statistics) = &statistics {
            for (name, summary) in statistics.summaries() {
                info!(
                    stage = %spec.stage_type,
                    operation = %name,
                    requests = summary.requests,
                    errors = summary.errors,
                    mean_us = summary.mean_us,
                    p99_us = summary.p99_us,
                    throughput = summary.throughput,
                    "Operation summary"
                );
            }
        }
        info!(stage = %spec.stage_type, severity = %result.severity, "Stage finished");

        Ok(StageReport {
            stage: spec.stage_type.clone(),
            severity: result.severity,
            messages: result.messages,
            statistics,
            acks,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Execute on one worker, synthesizing an `Error` ack for any failure
    ///
    /// A worker that timed out, either here or inside the transport, is told
    /// to stop its stressors.
    async fn execute_on(&self, worker: usize, spec: &StageSpec) -> StageAck {
        match timeout(self.config.stage_timeout, self.transport.execute_stage(worker, spec.clone())).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(TransportError::Timeout)) => {
                warn!(worker, stage = %spec.stage_type, "Stage request timed out, stopping the worker's stressors");
                self.stop_worker(worker).await;
                StageAck::error(worker, format!("transport error: {}", TransportError::Timeout))
            }
            Ok(Err(e)) => {
                error!(worker, stage = %spec.stage_type, error = %e, "Stage request failed");
                StageAck::error(worker, format!("transport error: {}", e))
            }
            Err(_) => {
                warn!(worker, stage = %spec.stage_type, "Worker did not acknowledge in time, stopping its stressors");
                self.stop_worker(worker).await;
                StageAck::timed_out(worker, self.config.stage_timeout)
            }
        }
    }

    async fn stop_worker(&self, worker: usize) {
        let stop = timeout(self.config.request_timeout, self.transport.stop_stressors(worker)).await;
        if !matches!(stop, Ok(Ok(()))) {
            warn!(worker, "Stop request failed");
        }
    }

    async fn collect_timelines(&self) -> Vec<TimelineSnapshot> {
        let spec = StageSpec::new(CollectTimelineStage::NAME);
        match self.run_stage(&spec).await {
            Ok(report) => report
                .acks
                .into_iter()
                .filter_map(|ack| match ack.payload {
                    AckPayload::Timeline { timeline } => Some(timeline),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Timeline collection failed");
                Vec::new()
            }
        }
    }
}

fn merge_statistics(acks: &[StageAck]) -> Option<Statistics> {
    let mut merged: Option<Statistics> = None;
    for statistics in acks.iter().filter_map(|ack| ack.payload.statistics()) {
        merged.get_or_insert_with(Statistics::new).merge(statistics);
    }
    merged
}
