//! In-memory transport to workers running in the same process

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::{WorkerHandle, WorkerStatus};
use crate::stage::{StageAck, StageSpec};
use crate::transport::{TransportError, WorkerTransport};

/// Transport that talks to in-process workers through their handles
pub struct InMemoryTransport {
    workers: BTreeMap<usize, WorkerHandle>,
    /// Optional timeout for stage execution
    timeout: Option<Duration>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport over worker handles (no timeout)
    pub fn new(handles: impl IntoIterator<Item = WorkerHandle>) -> Self {
        let workers = handles
            .into_iter()
            .map(|handle| (handle.worker_index(), handle))
            .collect();
        Self { workers, timeout: None }
    }

    /// Create a new in-memory transport with a timeout
    pub fn with_timeout(handles: impl IntoIterator<Item = WorkerHandle>, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new(handles)
        }
    }

    fn handle(&self, worker: usize) -> Result<&WorkerHandle, TransportError> {
        self.workers
            .get(&worker)
            .ok_or(TransportError::WorkerNotFound(worker))
    }
}

#[async_trait]
impl WorkerTransport for InMemoryTransport {
    fn workers(&self) -> Vec<usize> {
        self.workers.keys().copied().collect()
    }

    async fn execute_stage(&self, worker: usize, spec: StageSpec) -> Result<StageAck, TransportError> {
        let handle = self.handle(worker)?;
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, handle.execute(spec))
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => handle.execute(spec).await,
        }
    }

    async fn stop_stressors(&self, worker: usize) -> Result<(), TransportError> {
        self.handle(worker)?.stop_stressors();
        Ok(())
    }

    async fn status(&self, worker: usize) -> Result<WorkerStatus, TransportError> {
        Ok(self.handle(worker)?.status())
    }
}
