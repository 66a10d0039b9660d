//! Per-run worker context threaded through stage execution

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::Capabilities;
use crate::core::{StopSignal, Timeline, WorkerConfig};

/// Key of the live service handle in [`WorkerState`]
pub const SERVICE_INSTANCE: &str = "SERVICE_INSTANCE";

/// Mutable string-keyed state private to one worker, kept across stages
#[derive(Default)]
pub struct WorkerState {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Box::new(value));
    }

    /// Value under `key`, if present and of type `T`
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Everything a stage may use while running on a worker
///
/// Created once per worker run. The timeline is shared with the stressors,
/// and the stop signal lets the coordinator end a running stage early.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub capabilities: Capabilities,
    pub state: WorkerState,
    pub timeline: Arc<Timeline>,
    pub stop: StopSignal,
}

impl WorkerContext {
    pub fn new(config: WorkerConfig, capabilities: Capabilities) -> Self {
        let timeline = Arc::new(Timeline::new(config.worker_index));
        Self {
            config,
            capabilities,
            state: WorkerState::new(),
            timeline,
            stop: StopSignal::new(),
        }
    }

    pub fn worker_index(&self) -> usize {
        self.config.worker_index
    }

    /// Live service started by a `ServiceStart` stage, if any
    pub fn service(&self) -> Option<&Capabilities> {
        self.state.get::<Capabilities>(SERVICE_INSTANCE)
    }
}
