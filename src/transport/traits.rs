//! Transport abstraction for coordinator to worker communication

use async_trait::async_trait;
use thiserror::Error;

use crate::cluster::WorkerStatus;
use crate::stage::{StageAck, StageSpec};

/// How the coordinator reaches its workers
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Indexes of every worker reachable through this transport, ascending
    fn workers(&self) -> Vec<usize>;

    /// Send a stage to a worker and wait for its acknowledgement
    async fn execute_stage(&self, worker: usize, spec: StageSpec) -> Result<StageAck, TransportError>;

    /// Ask a worker to stop the stressors of its running stage
    async fn stop_stressors(&self, worker: usize) -> Result<(), TransportError>;

    /// Current status of a worker
    async fn status(&self, worker: usize) -> Result<WorkerStatus, TransportError>;
}

/// Errors that can occur during transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the worker failed or the worker has shut down
    #[error("connection to worker failed")]
    ConnectionFailed,
    /// Request timed out
    #[error("request timed out")]
    Timeout,
    /// No worker with this index
    #[error("worker {0} not found")]
    WorkerNotFound(usize),
    /// The worker answered with something other than the expected reply
    #[error("protocol error: {0}")]
    Protocol(String),
}
