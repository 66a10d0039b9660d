//! Coordinator and worker configuration parameters

use std::time::Duration;

/// Configuration for the coordinator side of a run
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long the coordinator waits for every worker to acknowledge a stage
    /// (default: 10 minutes). A worker that misses it gets a synthesized
    /// `Error` acknowledgement.
    pub stage_timeout: Duration,
    /// Timeout of short control requests such as stop and status
    /// (default: 10s)
    pub request_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config with a custom stage timeout
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Create a new config with a custom control request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Configuration for one worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Index of this worker in the cluster (0-based)
    pub worker_index: usize,
    /// Total number of workers taking part in the run
    pub worker_count: usize,
    /// Minimum wall-clock gap between two stressor progress log lines
    /// (default: 20s)
    pub progress_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_index: 0,
            worker_count: 1,
            progress_interval: Duration::from_secs(20),
        }
    }
}

impl WorkerConfig {
    /// Create a config for worker `index` out of `count`
    pub fn new(index: usize, count: usize) -> Self {
        Self {
            worker_index: index,
            worker_count: count,
            ..Self::default()
        }
    }

    /// Create a new config with a custom progress log interval
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}
