//! Weak counter test: throughput of an eventually consistent counter

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::context::WorkerContext;
use super::logic::Logic;
use super::spec::{PropertyDescriptor, PropertyKind, StageDescriptor};
use super::workload::{run_workload, TestSettings};
use super::{AckPayload, Stage, WorkerOutput};
use crate::adapter::invocations::{WeakAdd, WeakAddGetValue};
use crate::adapter::{weak_counter_ops, Capability, WeakCounter};
use crate::core::{LogicError, Operation, OperationSelector, Requester, StressorContext};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum WeakCounterOperation {
    Add,
    AddGetValue,
}

impl WeakCounterOperation {
    const NAMES: &'static [&'static str] = &["Add", "AddGetValue"];

    pub fn operation(self) -> Operation {
        match self {
            WeakCounterOperation::Add => *weak_counter_ops::ADD,
            WeakCounterOperation::AddGetValue => *weak_counter_ops::ADD_GET_VALUE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeakCounterConfig {
    pub counter_name: String,
    pub operation: WeakCounterOperation,
    pub delta: i64,
    #[serde(flatten)]
    pub settings: TestSettings,
}

pub struct WeakCounterTestStage {
    config: WeakCounterConfig,
}

impl WeakCounterTestStage {
    pub const NAME: &'static str = "WeakCounterTest";

    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::new(Self::NAME, "Tests a weak clustered counter")
            .property(PropertyDescriptor::required(
                "counter_name",
                PropertyKind::String,
                "Counter name",
            ))
            .property(PropertyDescriptor::with_default(
                "operation",
                PropertyKind::Choice(WeakCounterOperation::NAMES),
                "Add",
                "Operation to test",
            ))
            .property(PropertyDescriptor::with_default(
                "delta",
                PropertyKind::Integer,
                1,
                "Delta added by every operation",
            ))
            .properties(TestSettings::properties())
    }

    pub fn new(config: WeakCounterConfig) -> Result<Self> {
        config.settings.validate(Self::NAME)?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Stage for WeakCounterTestStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::WeakCounterOperations]
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        let selector = OperationSelector::single(self.config.operation.operation());
        let run = run_workload(ctx, Self::NAME, &self.config.settings, selector, |_| {
            Logic::WeakCounter(WeakCounterLogic::new(&self.config.counter_name, self.config.delta))
        })
        .await?;

        Ok(WorkerOutput::ok(AckPayload::Statistics {
            statistics: run.statistics,
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeakCounterResetConfig {
    pub counter_name: String,
}

/// Resets a weak counter from worker 0
///
/// The other workers acknowledge without touching the counter. The next
/// stage is broadcast only after every acknowledgement arrived, so no add
/// of a following test can race the reset.
pub struct WeakCounterResetStage {
    config: WeakCounterResetConfig,
}

impl WeakCounterResetStage {
    pub const NAME: &'static str = "WeakCounterReset";

    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::new(Self::NAME, "Resets a weak clustered counter").property(PropertyDescriptor::required(
            "counter_name",
            PropertyKind::String,
            "Counter name",
        ))
    }

    pub fn new(config: WeakCounterResetConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Stage for WeakCounterResetStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::WeakCounterOperations]
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        if ctx.worker_index() != 0 {
            return Ok(WorkerOutput::default());
        }

        let counter = ctx
            .capabilities
            .weak_counters()?
            .weak_counter(&self.config.counter_name)?;
        counter.reset().await?;
        info!(counter = %self.config.counter_name, "Weak counter reset");
        Ok(WorkerOutput::default())
    }
}

/// Stressor logic adding to one shared weak counter
pub struct WeakCounterLogic {
    counter_name: String,
    counter: Option<Arc<dyn WeakCounter>>,
    delta: i64,
}

impl WeakCounterLogic {
    pub fn new(counter_name: &str, delta: i64) -> Self {
        Self {
            counter_name: counter_name.to_string(),
            counter: None,
            delta,
        }
    }

    pub(crate) async fn init(
        &mut self,
        context: &StressorContext,
        requester: &mut Requester,
    ) -> std::result::Result<(), LogicError> {
        let counters = context
            .capabilities
            .weak_counters()
            .map_err(|e| LogicError::Init(e.to_string()))?;
        self.counter = Some(
            counters
                .weak_counter(&self.counter_name)
                .map_err(|e| LogicError::Init(e.to_string()))?,
        );

        if requester.uses_transactions() {
            warn!(stressor = context.global_index, "Transactions ignored for counter operations");
        }
        requester.set_use_transactions(false);
        Ok(())
    }

    pub(crate) async fn run(
        &mut self,
        operation: Operation,
        requester: &mut Requester,
    ) -> std::result::Result<(), LogicError> {
        let counter = self
            .counter
            .clone()
            .ok_or_else(|| LogicError::Init("counter not initialized".to_string()))?;

        if operation == *weak_counter_ops::ADD {
            requester
                .make_request(WeakAdd {
                    counter,
                    delta: self.delta,
                })
                .await?;
        } else if operation == *weak_counter_ops::ADD_GET_VALUE {
            requester
                .make_request(WeakAddGetValue {
                    counter,
                    delta: self.delta,
                })
                .await?;
        } else {
            return Err(LogicError::UnknownOperation(operation));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Lifecycle as _, MemoryService, MemoryServiceConfig, WeakCounterOperations as _};
    use crate::core::WorkerConfig;
    use crate::stage::spec::StageSpec;
    use crate::stage::{Severity, StageCatalog};

    #[tokio::test]
    async fn test_reset_only_on_first_worker() {
        let service = MemoryService::new(MemoryServiceConfig::default());
        service.start().await.unwrap();
        let counter = service.weak_counter("w").unwrap();
        counter.add(100).await.unwrap();

        let stage = StageCatalog::builtin()
            .build(&StageSpec::new("WeakCounterReset").with_property("counter_name", "w"))
            .unwrap();

        let mut second = WorkerContext::new(WorkerConfig::new(1, 2), service.capabilities());
        stage.execute_on_worker(&mut second).await.unwrap();
        assert_eq!(counter.get_value().await.unwrap(), 100);

        let mut first = WorkerContext::new(WorkerConfig::new(0, 2), service.capabilities());
        let output = stage.execute_on_worker(&mut first).await.unwrap();
        assert_eq!(output.severity, Severity::Ok);
        assert_eq!(counter.get_value().await.unwrap(), 0);
    }

    #[test]
    fn test_reset_on_init_is_not_a_test_property() {
        let result = StageCatalog::builtin().build(
            &StageSpec::new("WeakCounterTest")
                .with_property("counter_name", "w")
                .with_property("reset_on_init", true),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_add_get_value_operation() {
        let service = MemoryService::new(MemoryServiceConfig::default());
        service.start().await.unwrap();

        let stage = StageCatalog::builtin()
            .build(
                &StageSpec::new("WeakCounterTest")
                    .with_property("counter_name", "agv")
                    .with_property("operation", "AddGetValue")
                    .with_property("delta", 3)
                    .with_property("num_threads_per_worker", 1)
                    .with_property("ops_per_thread", 4),
            )
            .unwrap();
        let mut ctx = WorkerContext::new(WorkerConfig::default(), service.capabilities());
        let output = stage.execute_on_worker(&mut ctx).await.unwrap();

        let statistics = output.payload.statistics().unwrap();
        assert_eq!(statistics.operation("WeakCounterOperations.AddGetValue").unwrap().requests, 4);
        assert_eq!(service.weak_counter("agv").unwrap().get_value().await.unwrap(), 12);
    }
}
