//! Worker - executes the stages sent by the coordinator, one at a time

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, info};

use crate::adapter::{register_builtin_operations, Capabilities};
use crate::core::timeline::now_millis;
use crate::core::{Category, Event, StopSignal, WorkerConfig};
use crate::error::{HarnessError, Result};
use crate::stage::{Severity, StageAck, StageCatalog, StageSpec, WorkerContext, WorkerOutput};
use crate::transport::TransportError;

/// Timeline category holding one interval per executed stage
pub const STAGES_CATEGORY: &str = "Stages";

/// Snapshot of what a worker is doing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_index: usize,
    pub worker_count: usize,
    /// Stage type currently executing, if any
    pub current_stage: Option<String>,
    pub stages_executed: u64,
}

#[derive(Default)]
struct Progress {
    current_stage: Option<String>,
    stages_executed: u64,
}

/// Command sent to the Worker loop
enum Command {
    /// Execute a stage and reply with the acknowledgement
    Execute {
        spec: StageSpec,
        reply: oneshot::Sender<StageAck>,
    },
}

/// Handle for interacting with a running Worker
#[derive(Clone)]
pub struct WorkerHandle {
    worker_index: usize,
    worker_count: usize,
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: mpsc::Sender<()>,
    stop: StopSignal,
    progress: Arc<Mutex<Progress>>,
}

impl WorkerHandle {
    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    /// Execute a stage on this worker and wait for the acknowledgement
    pub async fn execute(&self, spec: StageSpec) -> std::result::Result<StageAck, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Execute { spec, reply: reply_tx })
            .await
            .map_err(|_| TransportError::ConnectionFailed)?;

        reply_rx.await.map_err(|_| TransportError::ConnectionFailed)
    }

    /// Stop the stressors of the running stage; they exit at their next iteration
    pub fn stop_stressors(&self) {
        info!(worker = self.worker_index, "Stop requested");
        self.stop.raise();
    }

    pub fn status(&self) -> WorkerStatus {
        let progress = self.progress.lock();
        WorkerStatus {
            worker_index: self.worker_index,
            worker_count: self.worker_count,
            current_stage: progress.current_stage.clone(),
            stages_executed: progress.stages_executed,
        }
    }

    /// Shutdown the Worker, stopping a running stage first
    pub async fn shutdown(&self) {
        self.stop.raise();
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Worker that runs stages sequentially against its service
pub struct Worker {
    context: WorkerContext,
    catalog: StageCatalog,
    command_rx: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    shutdown_rx: mpsc::Receiver<()>,
    shutdown_tx: mpsc::Sender<()>,
    progress: Arc<Mutex<Progress>>,
}

impl Worker {
    /// Create a worker over the capabilities of its service
    pub fn new(config: WorkerConfig, capabilities: Capabilities) -> Self {
        register_builtin_operations();

        let (command_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            context: WorkerContext::new(config, capabilities),
            catalog: StageCatalog::builtin(),
            command_rx,
            command_tx,
            shutdown_rx,
            shutdown_tx,
            progress: Arc::new(Mutex::new(Progress::default())),
        }
    }

    /// Start the worker loop and return a handle for interaction
    pub fn start(self) -> WorkerHandle {
        let handle = WorkerHandle {
            worker_index: self.context.config.worker_index,
            worker_count: self.context.config.worker_count,
            command_tx: self.command_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            stop: self.context.stop.clone(),
            progress: self.progress.clone(),
        };

        tokio::spawn(self.run());

        handle
    }

    /// Main worker loop
    async fn run(mut self) {
        let worker = self.context.worker_index();
        info!(worker, count = self.context.config.worker_count, "Worker started");

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    break;
                }
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        Command::Execute { spec, reply } => {
                            let ack = self.execute(spec).await;
                            let _ = reply.send(ack);
                        }
                    }
                }
                else => break,
            }
        }

        info!(worker, "Worker stopped");
    }

    /// Execute one stage, turning any failure into an `Error` acknowledgement
    async fn execute(&mut self, spec: StageSpec) -> StageAck {
        let worker = self.context.worker_index();
        let timestamp = now_millis();
        let started = Instant::now();

        self.context.stop.reset();
        self.progress.lock().current_stage = Some(spec.stage_type.clone());
        info!(worker, stage = %spec.stage_type, "Executing stage");

        let ack = match self.run_stage(&spec).await {
            Ok(output) => StageAck::from_output(worker, output, started.elapsed()),
            Err(e) => {
                error!(worker, stage = %spec.stage_type, error = %e, "Stage failed");
                let mut ack = StageAck::error(worker, e.to_string());
                ack.severity = failure_severity(&e);
                ack.duration_ms = started.elapsed().as_millis() as u64;
                ack
            }
        };

        self.context.timeline.add_event(
            Category::custom(STAGES_CATEGORY),
            Event::interval(timestamp, spec.stage_type.clone(), ack.duration_ms),
        );
        {
            let mut progress = self.progress.lock();
            progress.current_stage = None;
            progress.stages_executed += 1;
        }
        info!(worker, stage = %spec.stage_type, severity = %ack.severity, duration_ms = ack.duration_ms, "Stage finished");
        ack
    }

    async fn run_stage(&mut self, spec: &StageSpec) -> Result<WorkerOutput> {
        let stage = self.catalog.build(spec)?;
        self.context.capabilities.ensure(&stage.required_capabilities())?;
        stage.execute_on_worker(&mut self.context).await
    }
}

/// Severity acknowledged for a stage that returned `error`
///
/// Only a stressor that gave up on its own operations lets the run go on.
fn failure_severity(error: &HarnessError) -> Severity {
    match error {
        HarnessError::StressorFailed(_) => Severity::Failed,
        _ => Severity::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Capability, MemoryService, MemoryServiceConfig};
    use crate::stage::AckPayload;

    #[test]
    fn test_failure_severity() {
        assert_eq!(
            failure_severity(&HarnessError::StressorFailed("stressor 0: unknown operation".to_string())),
            Severity::Failed
        );
        assert_eq!(
            failure_severity(&HarnessError::StressorAborted("stressor 0: repeated".to_string())),
            Severity::Error
        );
        assert_eq!(failure_severity(&HarnessError::UnknownStage("X".to_string())), Severity::Error);
    }

    fn start_worker(capabilities: Capabilities) -> WorkerHandle {
        Worker::new(WorkerConfig::new(0, 1), capabilities).start()
    }

    #[tokio::test]
    async fn test_execute_stages_in_order() {
        let service = MemoryService::new(MemoryServiceConfig::default());
        let handle = start_worker(service.capabilities());

        let ack = handle.execute(StageSpec::new("ServiceStart")).await.unwrap();
        assert_eq!(ack.severity, Severity::Ok);

        let ack = handle
            .execute(
                StageSpec::new("StrongCounterTest")
                    .with_property("counter_name", "c")
                    .with_property("num_threads_per_worker", 2)
                    .with_property("ops_per_thread", 10),
            )
            .await
            .unwrap();
        assert_eq!(ack.severity, Severity::Ok);
        assert!(matches!(ack.payload, AckPayload::CounterValues { .. }));

        let status = handle.status();
        assert_eq!(status.stages_executed, 2);
        assert_eq!(status.current_stage, None);

        let ack = handle.execute(StageSpec::new("CollectTimeline")).await.unwrap();
        match ack.payload {
            AckPayload::Timeline { timeline } => {
                let stages = timeline.events(&Category::custom(STAGES_CATEGORY));
                assert_eq!(stages.len(), 2);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_capability_acks_error() {
        let handle = start_worker(Capabilities::new());

        let ack = handle
            .execute(StageSpec::new("WeakCounterTest").with_property("counter_name", "w"))
            .await
            .unwrap();
        assert_eq!(ack.severity, Severity::Error);
        let message = ack.error_message.unwrap();
        assert!(message.contains(&Capability::WeakCounterOperations.to_string()), "{}", message);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_stage_acks_error() {
        let handle = start_worker(Capabilities::new());

        let ack = handle.execute(StageSpec::new("NoSuchStage")).await.unwrap();
        assert_eq!(ack.severity, Severity::Error);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_ends_unbounded_stage() {
        let service = MemoryService::new(MemoryServiceConfig::default());
        let handle = start_worker(service.capabilities());
        handle.execute(StageSpec::new("ServiceStart")).await.unwrap();

        let running = handle.clone();
        let task = tokio::spawn(async move {
            running
                .execute(
                    StageSpec::new("WeakCounterTest")
                        .with_property("counter_name", "w")
                        .with_property("num_threads_per_worker", 2),
                )
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(handle.status().current_stage.as_deref(), Some("WeakCounterTest"));
        handle.stop_stressors();

        let ack = task.await.unwrap().unwrap();
        assert_eq!(ack.severity, Severity::Ok);
        assert!(ack.payload.statistics().unwrap().total_requests() > 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_after_shutdown_fails() {
        let handle = start_worker(Capabilities::new());
        handle.shutdown().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let result = handle.execute(StageSpec::new("CollectTimeline")).await;
        assert_eq!(result, Err(TransportError::ConnectionFailed));
    }
}
