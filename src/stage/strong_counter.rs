//! Strong counter test: load plus a cluster-wide gapless-history check

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::context::WorkerContext;
use super::logic::Logic;
use super::spec::{PropertyDescriptor, PropertyKind, StageDescriptor};
use super::workload::{run_workload, TestSettings};
use super::{AckPayload, Severity, Stage, StageAck, StageResult, WorkerOutput};
use crate::adapter::invocations::{AddAndGet, CompareAndSet, DecrementAndGet, IncrementAndGet};
use crate::adapter::{strong_counter_ops, Capability, StrongCounter};
use crate::checker::{CounterChecker, CounterHistory, ValueSequence};
use crate::core::{LogicError, Operation, OperationSelector, Requester, StressorContext};
use crate::error::{HarnessError, Result};

/// Counter operation a strong counter stage exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CounterOperation {
    IncrementAndGet,
    DecrementAndGet,
    AddAndGet,
    CompareAndSet,
}

impl CounterOperation {
    const NAMES: &'static [&'static str] = &["IncrementAndGet", "DecrementAndGet", "AddAndGet", "CompareAndSet"];

    pub fn operation(self) -> Operation {
        match self {
            CounterOperation::IncrementAndGet => *strong_counter_ops::INCREMENT_AND_GET,
            CounterOperation::DecrementAndGet => *strong_counter_ops::DECREMENT_AND_GET,
            CounterOperation::AddAndGet => *strong_counter_ops::ADD_AND_GET,
            CounterOperation::CompareAndSet => *strong_counter_ops::COMPARE_AND_SET,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrongCounterConfig {
    pub counter_name: String,
    /// Value the counter is expected to hold when the stage starts
    pub initial_value: i64,
    pub operation: CounterOperation,
    pub delta: i64,
    #[serde(flatten)]
    pub settings: TestSettings,
}

pub struct StrongCounterTestStage {
    config: StrongCounterConfig,
    /// Delta the counter moves by; forced to +1/-1 for increment/decrement
    delta: i64,
}

impl StrongCounterTestStage {
    pub const NAME: &'static str = "StrongCounterTest";

    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::new(Self::NAME, "Tests a strong clustered counter")
            .property(PropertyDescriptor::required(
                "counter_name",
                PropertyKind::String,
                "Counter name",
            ))
            .property(PropertyDescriptor::with_default(
                "initial_value",
                PropertyKind::Integer,
                0,
                "Value the test starts counting from",
            ))
            .property(PropertyDescriptor::with_default(
                "operation",
                PropertyKind::Choice(CounterOperation::NAMES),
                "IncrementAndGet",
                "Operation to test",
            ))
            .property(PropertyDescriptor::with_default(
                "delta",
                PropertyKind::Integer,
                1,
                "Delta for AddAndGet and CompareAndSet",
            ))
            .properties(TestSettings::properties())
    }

    pub fn new(config: StrongCounterConfig) -> Result<Self> {
        config.settings.validate(Self::NAME)?;
        let delta = match config.operation {
            CounterOperation::IncrementAndGet => 1,
            CounterOperation::DecrementAndGet => -1,
            CounterOperation::AddAndGet | CounterOperation::CompareAndSet => config.delta,
        };
        if delta == 0 {
            return Err(HarnessError::invalid_config(Self::NAME, "delta must not be 0"));
        }
        Ok(Self { config, delta })
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }
}

#[async_trait]
impl Stage for StrongCounterTestStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::StrongCounterOperations]
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        let selector = OperationSelector::single(self.config.operation.operation());
        let run = run_workload(ctx, Self::NAME, &self.config.settings, selector, |_| {
            Logic::StrongCounter(StrongCounterLogic::new(
                &self.config.counter_name,
                self.config.initial_value,
                self.delta,
            ))
        })
        .await?;

        let worker = ctx.worker_index();
        let sequences = run
            .reports
            .into_iter()
            .filter_map(|report| match report.logic {
                Logic::StrongCounter(logic) => Some(ValueSequence::new(
                    worker,
                    report.global_index,
                    logic.into_values(),
                )),
                _ => None,
            })
            .collect();

        Ok(WorkerOutput::ok(AckPayload::CounterValues {
            statistics: run.statistics,
            sequences,
        }))
    }

    fn process_acks(&self, acks: &[StageAck]) -> StageResult {
        let mut result = StageResult::from_acks(acks);
        if result.severity.halts_run() {
            return result;
        }

        let mut history = CounterHistory::new();
        for ack in acks {
            if let AckPayload::CounterValues { sequences, .. } = &ack.payload {
                history.extend(sequences.iter().cloned());
            }
        }

        let check = CounterChecker::check(&history, self.delta);
        if check.is_consistent {
            info!(counter = %self.config.counter_name, checked = check.checked, "Counter history is consistent");
        } else {
            let reason = check.error.unwrap_or_else(|| "inconsistent counter".to_string());
            warn!(counter = %self.config.counter_name, %reason, "Counter history is inconsistent");
            result.escalate(Severity::Error, reason);
        }
        result
    }
}

/// Stressor logic hammering one shared strong counter
///
/// Remembers the last value it saw; a mutation returning that same value
/// again is a local consistency violation.
pub struct StrongCounterLogic {
    counter_name: String,
    counter: Option<Arc<dyn StrongCounter>>,
    delta: i64,
    previous: i64,
    values: Vec<i64>,
}

impl StrongCounterLogic {
    pub fn new(counter_name: &str, initial_value: i64, delta: i64) -> Self {
        Self {
            counter_name: counter_name.to_string(),
            counter: None,
            delta,
            previous: initial_value,
            values: Vec::new(),
        }
    }

    /// Values returned by successful mutations, in call order
    pub fn into_values(self) -> Vec<i64> {
        self.values
    }

    pub(crate) async fn init(&mut self, context: &StressorContext, requester: &mut Requester) -> std::result::Result<(), LogicError> {
        let counters = context
            .capabilities
            .strong_counters()
            .map_err(|e| LogicError::Init(e.to_string()))?;
        let counter = counters
            .strong_counter(&self.counter_name)
            .map_err(|e| LogicError::Init(e.to_string()))?;
        self.counter = Some(counter);

        if requester.uses_transactions() {
            warn!(stressor = context.global_index, "Transactions ignored for counter operations");
        }
        requester.set_use_transactions(false);
        Ok(())
    }

    pub(crate) async fn run(&mut self, operation: Operation, requester: &mut Requester) -> std::result::Result<(), LogicError> {
        let counter = self
            .counter
            .clone()
            .ok_or_else(|| LogicError::Init("counter not initialized".to_string()))?;

        let current = if operation == *strong_counter_ops::INCREMENT_AND_GET {
            requester.make_request(IncrementAndGet(counter)).await?
        } else if operation == *strong_counter_ops::DECREMENT_AND_GET {
            requester.make_request(DecrementAndGet(counter)).await?
        } else if operation == *strong_counter_ops::ADD_AND_GET {
            requester
                .make_request(AddAndGet {
                    counter,
                    delta: self.delta,
                })
                .await?
        } else if operation == *strong_counter_ops::COMPARE_AND_SET {
            let update = self.previous.wrapping_add(self.delta);
            let swapped = requester
                .make_request(CompareAndSet {
                    counter: counter.clone(),
                    expect: self.previous,
                    update,
                })
                .await?;
            if !swapped {
                // Lost the race; learn the current value and retry next round
                self.previous = counter.get_value().await?;
                return Ok(());
            }
            update
        } else {
            return Err(LogicError::UnknownOperation(operation));
        };

        if current == self.previous {
            return Err(LogicError::Consistency(format!(
                "Inconsistent counter! The value should be different from {}",
                self.previous
            )));
        }
        self.previous = current;
        self.values.push(current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Lifecycle as _, MemoryService, MemoryServiceConfig};
    use crate::core::Timeline;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use crate::stage::spec::StageSpec;
    use crate::stage::StageCatalog;

    fn build(spec: StageSpec) -> Result<Box<dyn Stage>> {
        StageCatalog::builtin().build(&spec)
    }

    fn ack_with(worker_index: usize, sequences: Vec<ValueSequence>) -> StageAck {
        StageAck::ok(
            worker_index,
            AckPayload::CounterValues {
                statistics: Default::default(),
                sequences,
            },
        )
    }

    #[test]
    fn test_delta_forced_for_increment_and_decrement() {
        let spec = StageSpec::new("StrongCounterTest")
            .with_property("counter_name", "c")
            .with_property("delta", 7);
        let config: StrongCounterConfig = StrongCounterTestStage::descriptor().parse(&spec.properties).unwrap();
        assert_eq!(StrongCounterTestStage::new(config).unwrap().delta(), 1);

        let spec = spec.with_property("operation", "DecrementAndGet");
        let config: StrongCounterConfig = StrongCounterTestStage::descriptor().parse(&spec.properties).unwrap();
        assert_eq!(StrongCounterTestStage::new(config).unwrap().delta(), -1);

        let spec = spec.with_property("operation", "AddAndGet");
        let config: StrongCounterConfig = StrongCounterTestStage::descriptor().parse(&spec.properties).unwrap();
        assert_eq!(StrongCounterTestStage::new(config).unwrap().delta(), 7);
    }

    #[test]
    fn test_zero_delta_rejected() {
        let spec = StageSpec::new("StrongCounterTest")
            .with_property("counter_name", "c")
            .with_property("operation", "AddAndGet")
            .with_property("delta", 0);
        assert!(matches!(build(spec), Err(HarnessError::InvalidConfig { .. })));
    }

    #[test]
    fn test_process_acks_detects_skipped_value() {
        let stage = build(StageSpec::new("StrongCounterTest").with_property("counter_name", "c")).unwrap();

        let ok = stage.process_acks(&[
            ack_with(0, vec![ValueSequence::new(0, 0, vec![1, 3])]),
            ack_with(1, vec![ValueSequence::new(1, 1, vec![2, 4])]),
        ]);
        assert_eq!(ok.severity, Severity::Ok);

        let broken = stage.process_acks(&[
            ack_with(0, vec![ValueSequence::new(0, 0, vec![1, 2])]),
            ack_with(1, vec![ValueSequence::new(1, 1, vec![4])]),
        ]);
        assert_eq!(broken.severity, Severity::Error);
        assert!(broken.messages[0].contains("The value 3 skipped"));
    }

    #[test]
    fn test_process_acks_skips_check_after_error() {
        let stage = build(StageSpec::new("StrongCounterTest").with_property("counter_name", "c")).unwrap();
        let result = stage.process_acks(&[
            ack_with(0, vec![ValueSequence::new(0, 0, vec![1, 1])]),
            StageAck::error(1, "boom"),
        ]);
        assert_eq!(result.severity, Severity::Error);
        assert_eq!(result.messages, vec!["worker 1: boom".to_string()]);
    }

    async fn stressor_context() -> StressorContext {
        let service = MemoryService::new(MemoryServiceConfig::default());
        service.start().await.unwrap();
        StressorContext {
            worker_index: 0,
            global_index: 0,
            capabilities: service.capabilities(),
            timeline: Arc::new(Timeline::new(0)),
        }
    }

    #[tokio::test]
    async fn test_compare_and_set_logic_records_updates() {
        let context = stressor_context().await;
        let mut requester = Requester::new(StdRng::seed_from_u64(0));
        let mut logic = StrongCounterLogic::new("cas", 0, 2);
        logic.init(&context, &mut requester).await.unwrap();

        for _ in 0..5 {
            logic
                .run(*strong_counter_ops::COMPARE_AND_SET, &mut requester)
                .await
                .unwrap();
        }
        assert_eq!(logic.into_values(), vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_compare_and_set_wraps_at_max() {
        let context = stressor_context().await;
        let counter = context
            .capabilities
            .strong_counters()
            .unwrap()
            .strong_counter("edge")
            .unwrap();
        assert!(counter.compare_and_set(0, i64::MAX).await.unwrap());

        let mut requester = Requester::new(StdRng::seed_from_u64(0));
        let mut logic = StrongCounterLogic::new("edge", i64::MAX, 1);
        logic.init(&context, &mut requester).await.unwrap();
        logic
            .run(*strong_counter_ops::COMPARE_AND_SET, &mut requester)
            .await
            .unwrap();

        assert_eq!(logic.into_values(), vec![i64::MIN]);
        assert_eq!(counter.get_value().await.unwrap(), i64::MIN);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_fatal() {
        let context = stressor_context().await;
        let mut requester = Requester::new(StdRng::seed_from_u64(0));
        let mut logic = StrongCounterLogic::new("c", 0, 1);
        logic.init(&context, &mut requester).await.unwrap();

        let err = logic
            .run(Operation::builtin("StrongCounterTest.Bogus"), &mut requester)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_repeated_value_is_consistency_violation() {
        let context = stressor_context().await;
        let mut requester = Requester::new(StdRng::seed_from_u64(0));
        // Pretend we already saw 1; the first increment returns 1 again
        let mut logic = StrongCounterLogic::new("repeat", 1, 1);
        logic.init(&context, &mut requester).await.unwrap();

        let err = logic
            .run(*strong_counter_ops::INCREMENT_AND_GET, &mut requester)
            .await
            .unwrap_err();
        assert!(matches!(err, LogicError::Consistency(_)));
    }
}
