//! Explicit capability registry injected into stages

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::traits::{
    ConnectionSettings, Lifecycle, StrongCounterOperations, TemporalOperations, TimeoutOperations,
    Transactional, WeakCounterOperations,
};
use crate::error::{HarnessError, Result};

/// A capability a stage may require from the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Lifecycle,
    StrongCounterOperations,
    WeakCounterOperations,
    TimeoutOperations,
    TemporalOperations,
    Transactional,
    ConnectionSettings,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Lifecycle => "Lifecycle",
            Capability::StrongCounterOperations => "StrongCounterOperations",
            Capability::WeakCounterOperations => "WeakCounterOperations",
            Capability::TimeoutOperations => "TimeoutOperations",
            Capability::TemporalOperations => "TemporalOperations",
            Capability::Transactional => "Transactional",
            Capability::ConnectionSettings => "ConnectionSettings",
        };
        f.write_str(name)
    }
}

/// Capabilities a service provides, resolved per worker
#[derive(Clone, Default)]
pub struct Capabilities {
    lifecycle: Option<Arc<dyn Lifecycle>>,
    strong_counters: Option<Arc<dyn StrongCounterOperations>>,
    weak_counters: Option<Arc<dyn WeakCounterOperations>>,
    timeout: Option<Arc<dyn TimeoutOperations>>,
    temporal: Option<Arc<dyn TemporalOperations>>,
    transactional: Option<Arc<dyn Transactional>>,
    connection_settings: Option<Arc<dyn ConnectionSettings>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn with_strong_counters(mut self, ops: Arc<dyn StrongCounterOperations>) -> Self {
        self.strong_counters = Some(ops);
        self
    }

    pub fn with_weak_counters(mut self, ops: Arc<dyn WeakCounterOperations>) -> Self {
        self.weak_counters = Some(ops);
        self
    }

    pub fn with_timeout_operations(mut self, ops: Arc<dyn TimeoutOperations>) -> Self {
        self.timeout = Some(ops);
        self
    }

    pub fn with_temporal_operations(mut self, ops: Arc<dyn TemporalOperations>) -> Self {
        self.temporal = Some(ops);
        self
    }

    pub fn with_transactional(mut self, transactional: Arc<dyn Transactional>) -> Self {
        self.transactional = Some(transactional);
        self
    }

    pub fn with_connection_settings(mut self, settings: Arc<dyn ConnectionSettings>) -> Self {
        self.connection_settings = Some(settings);
        self
    }

    pub fn lifecycle(&self) -> Result<Arc<dyn Lifecycle>> {
        require(&self.lifecycle, Capability::Lifecycle)
    }

    pub fn strong_counters(&self) -> Result<Arc<dyn StrongCounterOperations>> {
        require(&self.strong_counters, Capability::StrongCounterOperations)
    }

    pub fn weak_counters(&self) -> Result<Arc<dyn WeakCounterOperations>> {
        require(&self.weak_counters, Capability::WeakCounterOperations)
    }

    pub fn timeout_operations(&self) -> Result<Arc<dyn TimeoutOperations>> {
        require(&self.timeout, Capability::TimeoutOperations)
    }

    pub fn temporal_operations(&self) -> Result<Arc<dyn TemporalOperations>> {
        require(&self.temporal, Capability::TemporalOperations)
    }

    /// Optional: stressors run without transactions when absent
    pub fn transactional(&self) -> Option<Arc<dyn Transactional>> {
        self.transactional.clone()
    }

    /// Optional: reconfiguration is a no-op when absent
    pub fn connection_settings(&self) -> Option<Arc<dyn ConnectionSettings>> {
        self.connection_settings.clone()
    }

    pub fn provides(&self, capability: Capability) -> bool {
        match capability {
            Capability::Lifecycle => self.lifecycle.is_some(),
            Capability::StrongCounterOperations => self.strong_counters.is_some(),
            Capability::WeakCounterOperations => self.weak_counters.is_some(),
            Capability::TimeoutOperations => self.timeout.is_some(),
            Capability::TemporalOperations => self.temporal.is_some(),
            Capability::Transactional => self.transactional.is_some(),
            Capability::ConnectionSettings => self.connection_settings.is_some(),
        }
    }

    /// Fail with the first capability in `required` that is not provided
    pub fn ensure(&self, required: &[Capability]) -> Result<()> {
        match required.iter().find(|c| !self.provides(**c)) {
            Some(missing) => Err(HarnessError::MissingCapability(*missing)),
            None => Ok(()),
        }
    }
}

fn require<T: ?Sized>(slot: &Option<Arc<T>>, capability: Capability) -> Result<Arc<T>> {
    slot.clone().ok_or(HarnessError::MissingCapability(capability))
}
