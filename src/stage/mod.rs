//! Stages: the units of work the coordinator broadcasts to workers
//!
//! A stage runs on every worker through `execute_on_worker` and is then
//! judged on the coordinator by `process_acks`, which sees the
//! acknowledgements of all workers at once.

pub mod cache;
pub mod context;
pub mod lifecycle;
pub mod logic;
pub mod spec;
pub mod strong_counter;
pub mod weak_counter;
pub mod workload;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapter::Capability;
use crate::checker::ValueSequence;
use crate::core::{Statistics, TimelineSnapshot};
use crate::error::Result;

pub use context::{WorkerContext, WorkerState, SERVICE_INSTANCE};
pub use spec::{PropertyDescriptor, PropertyKind, Scenario, StageCatalog, StageDescriptor, StageSpec};
pub use workload::TestSettings;

/// Outcome severity, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Ok,
    Warn,
    Failed,
    Error,
}

impl Severity {
    /// Whether no further stage may run after this outcome
    pub fn halts_run(self) -> bool {
        self == Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Ok => "OK",
            Severity::Warn => "WARN",
            Severity::Failed => "FAILED",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Stage-specific data a worker sends back with its acknowledgement
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AckPayload {
    #[default]
    None,
    Statistics {
        statistics: Statistics,
    },
    CounterValues {
        statistics: Statistics,
        sequences: Vec<ValueSequence>,
    },
    Timeline {
        timeline: TimelineSnapshot,
    },
}

impl AckPayload {
    pub fn statistics(&self) -> Option<&Statistics> {
        match self {
            AckPayload::Statistics { statistics } | AckPayload::CounterValues { statistics, .. } => {
                Some(statistics)
            }
            _ => None,
        }
    }
}

/// One worker's acknowledgement of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAck {
    pub worker_index: usize,
    pub severity: Severity,
    pub error_message: Option<String>,
    #[serde(default)]
    pub payload: AckPayload,
    /// Wall-clock time the worker spent on the stage
    #[serde(default)]
    pub duration_ms: u64,
}

impl StageAck {
    pub fn ok(worker_index: usize, payload: AckPayload) -> Self {
        Self {
            worker_index,
            severity: Severity::Ok,
            error_message: None,
            payload,
            duration_ms: 0,
        }
    }

    pub fn error(worker_index: usize, message: impl Into<String>) -> Self {
        Self {
            worker_index,
            severity: Severity::Error,
            error_message: Some(message.into()),
            payload: AckPayload::None,
            duration_ms: 0,
        }
    }

    /// Acknowledgement synthesized for a worker that did not answer in time
    pub fn timed_out(worker_index: usize, timeout: Duration) -> Self {
        Self::error(
            worker_index,
            format!("worker did not acknowledge within {:?}", timeout),
        )
    }

    pub fn from_output(worker_index: usize, output: WorkerOutput, duration: Duration) -> Self {
        Self {
            worker_index,
            severity: output.severity,
            error_message: output.message,
            payload: output.payload,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// What a stage produced on one worker
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkerOutput {
    pub severity: Severity,
    pub message: Option<String>,
    pub payload: AckPayload,
}

impl WorkerOutput {
    pub fn ok(payload: AckPayload) -> Self {
        Self {
            severity: Severity::Ok,
            message: None,
            payload,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warn,
            message: Some(message.into()),
            payload: AckPayload::None,
        }
    }
}

/// Aggregate verdict of a stage over all workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub severity: Severity,
    pub messages: Vec<String>,
}

impl StageResult {
    /// Worst severity over all acknowledgements
    pub fn from_acks(acks: &[StageAck]) -> Self {
        let severity = acks
            .iter()
            .map(|ack| ack.severity)
            .max()
            .unwrap_or(Severity::Ok);
        let messages = acks
            .iter()
            .filter_map(|ack| {
                ack.error_message
                    .as_ref()
                    .map(|msg| format!("worker {}: {}", ack.worker_index, msg))
            })
            .collect();
        Self { severity, messages }
    }

    /// Raise the severity to at least `severity`, recording why
    pub fn escalate(&mut self, severity: Severity, message: impl Into<String>) {
        self.severity = self.severity.max(severity);
        self.messages.push(message.into());
    }
}

/// A unit of work broadcast by the coordinator
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capabilities the worker's service must provide
    fn required_capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Run the stage locally on one worker
    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput>;

    /// Judge the acknowledgements of all workers
    fn process_acks(&self, acks: &[StageAck]) -> StageResult {
        StageResult::from_acks(acks)
    }
}
