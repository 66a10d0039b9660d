//! Cache workload stages: timeout-bounded get/put and writes with expiry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

use super::context::WorkerContext;
use super::logic::Logic;
use super::spec::{PropertyDescriptor, PropertyKind, StageDescriptor};
use super::workload::{run_workload, TestSettings};
use super::{AckPayload, Stage, WorkerOutput};
use crate::adapter::invocations::{
    GetAndPutWithLifespan, GetWithTimeout, PutIfAbsentWithLifespan, PutWithLifespan, PutWithTimeout,
};
use crate::adapter::{temporal_ops, timeout_ops, Capability, Expiry, TemporalCache, TimeoutCache};
use crate::core::{LogicError, Operation, OperationSelector, Requester, StressorContext};
use crate::error::{HarnessError, Result};

type LogicResult = std::result::Result<(), LogicError>;

/// Statistics group summing every timeout operation
pub const TIMEOUT_OPERATIONS_TOTAL: &str = "TimeoutOperations.Total";

/// Key space and value shape shared by the cache stages
#[derive(Debug, Clone, Copy)]
struct KeySpace {
    num_entries: u64,
    entry_size: usize,
}

impl KeySpace {
    fn properties() -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::with_default("num_entries", PropertyKind::Integer, 100, "Number of distinct keys"),
            PropertyDescriptor::with_default("entry_size", PropertyKind::Integer, 64, "Value size in bytes"),
        ]
    }

    fn validate(num_entries: u64, stage: &str) -> Result<()> {
        if num_entries == 0 {
            return Err(HarnessError::invalid_config(stage, "num_entries must be positive"));
        }
        Ok(())
    }

    fn key<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        format!("key_{}", rng.random_range(0..self.num_entries))
    }

    fn value<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u8> {
        let mut value = vec![0u8; self.entry_size];
        rng.fill(&mut value[..]);
        value
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutOperationsConfig {
    pub cache_name: String,
    pub get_ratio: u32,
    pub put_ratio: u32,
    pub operation_timeout_ms: u64,
    pub num_entries: u64,
    pub entry_size: usize,
    #[serde(flatten)]
    pub settings: TestSettings,
}

pub struct TimeoutOperationsTestStage {
    config: TimeoutOperationsConfig,
    selector: OperationSelector,
}

impl TimeoutOperationsTestStage {
    pub const NAME: &'static str = "TimeoutOperationsTest";

    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::new(Self::NAME, "Test using TimeoutOperations")
            .property(PropertyDescriptor::with_default(
                "cache_name",
                PropertyKind::String,
                "default",
                "Cache to run against",
            ))
            .property(PropertyDescriptor::with_default(
                "get_ratio",
                PropertyKind::Integer,
                4,
                "Ratio of GET requests",
            ))
            .property(PropertyDescriptor::with_default(
                "put_ratio",
                PropertyKind::Integer,
                1,
                "Ratio of PUT requests",
            ))
            .property(PropertyDescriptor::with_default(
                "operation_timeout_ms",
                PropertyKind::Integer,
                500,
                "Timeout of every request",
            ))
            .properties(KeySpace::properties())
            .properties(TestSettings::properties())
    }

    pub fn new(config: TimeoutOperationsConfig) -> Result<Self> {
        config.settings.validate(Self::NAME)?;
        KeySpace::validate(config.num_entries, Self::NAME)?;
        let selector = OperationSelector::builder()
            .add(*timeout_ops::GET, config.get_ratio)
            .add(*timeout_ops::PUT, config.put_ratio)
            .build()
            .map_err(|e| HarnessError::invalid_config(Self::NAME, e.to_string()))?;
        Ok(Self { config, selector })
    }
}

#[async_trait]
impl Stage for TimeoutOperationsTestStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::TimeoutOperations]
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        let keys = KeySpace {
            num_entries: self.config.num_entries,
            entry_size: self.config.entry_size,
        };
        let timeout = Duration::from_millis(self.config.operation_timeout_ms);
        let mut run = run_workload(ctx, Self::NAME, &self.config.settings, self.selector.clone(), |_| {
            Logic::Timeout(TimeoutLogic::new(&self.config.cache_name, timeout, keys))
        })
        .await?;

        run.statistics.register_group(
            TIMEOUT_OPERATIONS_TOTAL,
            &[
                *timeout_ops::GET,
                *timeout_ops::PUT,
                *timeout_ops::GET_TX,
                *timeout_ops::PUT_TX,
            ],
        );
        Ok(WorkerOutput::ok(AckPayload::Statistics {
            statistics: run.statistics,
        }))
    }
}

/// Stressor logic issuing timeout-bounded gets and puts
pub struct TimeoutLogic {
    cache_name: String,
    cache: Option<Arc<dyn TimeoutCache>>,
    timeout: Duration,
    keys: KeySpace,
}

impl TimeoutLogic {
    fn new(cache_name: &str, timeout: Duration, keys: KeySpace) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            cache: None,
            timeout,
            keys,
        }
    }

    pub(crate) async fn init(&mut self, context: &StressorContext, requester: &mut Requester) -> LogicResult {
        let operations = context
            .capabilities
            .timeout_operations()
            .map_err(|e| LogicError::Init(e.to_string()))?;
        self.cache = Some(
            operations
                .cache(&self.cache_name)
                .map_err(|e| LogicError::Init(e.to_string()))?,
        );
        requester.set_use_transactions(false);
        Ok(())
    }

    pub(crate) async fn run(&mut self, operation: Operation, requester: &mut Requester) -> LogicResult {
        let cache = self
            .cache
            .clone()
            .ok_or_else(|| LogicError::Init("cache not initialized".to_string()))?;
        let key = self.keys.key(requester.rng());

        if operation == *timeout_ops::GET {
            requester
                .make_request(GetWithTimeout {
                    cache,
                    key,
                    timeout: self.timeout,
                })
                .await?;
        } else if operation == *timeout_ops::PUT {
            let value = self.keys.value(requester.rng());
            requester
                .make_request(PutWithTimeout {
                    cache,
                    key,
                    value,
                    timeout: self.timeout,
                })
                .await?;
        } else {
            return Err(LogicError::UnknownOperation(operation));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemporalOperationsConfig {
    pub cache_name: String,
    pub put_with_lifespan_ratio: u32,
    pub put_with_lifespan_and_max_idle_ratio: u32,
    pub get_and_put_with_lifespan_ratio: u32,
    pub get_and_put_with_lifespan_and_max_idle_ratio: u32,
    pub put_if_absent_with_lifespan_ratio: u32,
    pub put_if_absent_with_lifespan_and_max_idle_ratio: u32,
    /// Negative means unlimited
    pub lifespan_ms: i64,
    /// Negative means unlimited
    pub max_idle_ms: i64,
    pub num_entries: u64,
    pub entry_size: usize,
    #[serde(flatten)]
    pub settings: TestSettings,
}

pub struct TemporalOperationsTestStage {
    config: TemporalOperationsConfig,
    selector: OperationSelector,
}

impl TemporalOperationsTestStage {
    pub const NAME: &'static str = "TemporalOperationsTest";

    const RATIOS: [(&'static str, u32); 6] = [
        ("put_with_lifespan_ratio", 1),
        ("put_with_lifespan_and_max_idle_ratio", 0),
        ("get_and_put_with_lifespan_ratio", 0),
        ("get_and_put_with_lifespan_and_max_idle_ratio", 0),
        ("put_if_absent_with_lifespan_ratio", 0),
        ("put_if_absent_with_lifespan_and_max_idle_ratio", 0),
    ];

    pub fn descriptor() -> StageDescriptor {
        let ratios = Self::RATIOS.iter().map(|(name, default)| {
            PropertyDescriptor::with_default(*name, PropertyKind::Integer, *default, "Ratio of this operation")
        });
        StageDescriptor::new(Self::NAME, "Test using TemporalOperations")
            .property(PropertyDescriptor::with_default(
                "cache_name",
                PropertyKind::String,
                "default",
                "Cache to run against",
            ))
            .properties(ratios)
            .property(PropertyDescriptor::with_default(
                "lifespan_ms",
                PropertyKind::Integer,
                1_000,
                "Entry lifespan; negative means unlimited",
            ))
            .property(PropertyDescriptor::with_default(
                "max_idle_ms",
                PropertyKind::Integer,
                500,
                "Entry max idle time; negative means unlimited",
            ))
            .properties(KeySpace::properties())
            .properties(TestSettings::properties())
    }

    pub fn new(config: TemporalOperationsConfig) -> Result<Self> {
        config.settings.validate(Self::NAME)?;
        KeySpace::validate(config.num_entries, Self::NAME)?;
        let selector = OperationSelector::builder()
            .add(*temporal_ops::PUT_WITH_LIFESPAN, config.put_with_lifespan_ratio)
            .add(
                *temporal_ops::PUT_WITH_LIFESPAN_AND_MAXIDLE,
                config.put_with_lifespan_and_max_idle_ratio,
            )
            .add(*temporal_ops::GET_AND_PUT_WITH_LIFESPAN, config.get_and_put_with_lifespan_ratio)
            .add(
                *temporal_ops::GET_AND_PUT_WITH_LIFESPAN_AND_MAXIDLE,
                config.get_and_put_with_lifespan_and_max_idle_ratio,
            )
            .add(*temporal_ops::PUT_IF_ABSENT_WITH_LIFESPAN, config.put_if_absent_with_lifespan_ratio)
            .add(
                *temporal_ops::PUT_IF_ABSENT_WITH_LIFESPAN_AND_MAXIDLE,
                config.put_if_absent_with_lifespan_and_max_idle_ratio,
            )
            .build()
            .map_err(|e| HarnessError::invalid_config(Self::NAME, e.to_string()))?;
        Ok(Self { config, selector })
    }
}

#[async_trait]
impl Stage for TemporalOperationsTestStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::TemporalOperations]
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        let keys = KeySpace {
            num_entries: self.config.num_entries,
            entry_size: self.config.entry_size,
        };
        let lifespan = Expiry::from_millis(self.config.lifespan_ms, None);
        let lifespan_and_idle = Expiry::from_millis(self.config.lifespan_ms, Some(self.config.max_idle_ms));
        let run = run_workload(ctx, Self::NAME, &self.config.settings, self.selector.clone(), |_| {
            Logic::Temporal(TemporalLogic::new(&self.config.cache_name, lifespan, lifespan_and_idle, keys))
        })
        .await?;

        Ok(WorkerOutput::ok(AckPayload::Statistics {
            statistics: run.statistics,
        }))
    }
}

/// Stressor logic writing entries with lifespan and max-idle expiry
pub struct TemporalLogic {
    cache_name: String,
    cache: Option<Arc<dyn TemporalCache>>,
    lifespan: Expiry,
    lifespan_and_idle: Expiry,
    keys: KeySpace,
}

impl TemporalLogic {
    fn new(cache_name: &str, lifespan: Expiry, lifespan_and_idle: Expiry, keys: KeySpace) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            cache: None,
            lifespan,
            lifespan_and_idle,
            keys,
        }
    }

    pub(crate) async fn init(&mut self, context: &StressorContext, _requester: &mut Requester) -> LogicResult {
        let operations = context
            .capabilities
            .temporal_operations()
            .map_err(|e| LogicError::Init(e.to_string()))?;
        self.cache = Some(
            operations
                .cache(&self.cache_name)
                .map_err(|e| LogicError::Init(e.to_string()))?,
        );
        Ok(())
    }

    pub(crate) async fn run(&mut self, operation: Operation, requester: &mut Requester) -> LogicResult {
        let cache = self
            .cache
            .clone()
            .ok_or_else(|| LogicError::Init("cache not initialized".to_string()))?;
        let key = self.keys.key(requester.rng());
        let value = self.keys.value(requester.rng());

        if operation == *temporal_ops::PUT_WITH_LIFESPAN || operation == *temporal_ops::PUT_WITH_LIFESPAN_AND_MAXIDLE {
            let expiry = self.expiry_for(operation == *temporal_ops::PUT_WITH_LIFESPAN_AND_MAXIDLE);
            requester
                .make_request(PutWithLifespan { cache, key, value, expiry })
                .await?;
        } else if operation == *temporal_ops::GET_AND_PUT_WITH_LIFESPAN
            || operation == *temporal_ops::GET_AND_PUT_WITH_LIFESPAN_AND_MAXIDLE
        {
            let expiry = self.expiry_for(operation == *temporal_ops::GET_AND_PUT_WITH_LIFESPAN_AND_MAXIDLE);
            requester
                .make_request(GetAndPutWithLifespan { cache, key, value, expiry })
                .await?;
        } else if operation == *temporal_ops::PUT_IF_ABSENT_WITH_LIFESPAN
            || operation == *temporal_ops::PUT_IF_ABSENT_WITH_LIFESPAN_AND_MAXIDLE
        {
            let expiry = self.expiry_for(operation == *temporal_ops::PUT_IF_ABSENT_WITH_LIFESPAN_AND_MAXIDLE);
            requester
                .make_request(PutIfAbsentWithLifespan { cache, key, value, expiry })
                .await?;
        } else {
            return Err(LogicError::UnknownOperation(operation));
        }
        Ok(())
    }

    /// Max-idle variants always carry a max idle, even an unlimited one, so
    /// they are recorded under their own operation
    fn expiry_for(&self, with_max_idle: bool) -> Expiry {
        if !with_max_idle {
            return self.lifespan;
        }
        Expiry {
            max_idle: self.lifespan_and_idle.max_idle.or(Some(Duration::MAX)),
            ..self.lifespan_and_idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Lifecycle as _, MemoryService, MemoryServiceConfig};
    use crate::core::WorkerConfig;
    use crate::stage::spec::StageSpec;
    use crate::stage::StageCatalog;

    async fn context(config: MemoryServiceConfig) -> WorkerContext {
        let service = MemoryService::new(config);
        service.start().await.unwrap();
        WorkerContext::new(WorkerConfig::default(), service.capabilities())
    }

    #[tokio::test]
    async fn test_timeout_stage_records_group_total() {
        let stage = StageCatalog::builtin()
            .build(
                &StageSpec::new("TimeoutOperationsTest")
                    .with_property("num_threads_per_worker", 3)
                    .with_property("ops_per_thread", 50)
                    .with_property("seed", 11),
            )
            .unwrap();
        let mut ctx = context(MemoryServiceConfig::default()).await;
        let output = stage.execute_on_worker(&mut ctx).await.unwrap();

        let statistics = output.payload.statistics().unwrap();
        let total = statistics.group_total(TIMEOUT_OPERATIONS_TOTAL).unwrap();
        assert_eq!(total.requests + total.errors, 150);
        assert_eq!(total.errors, 0);
        let gets = statistics.operation("TimeoutOperations.Get").unwrap().requests;
        let puts = statistics.operation("TimeoutOperations.Put").unwrap().requests;
        assert!(gets > puts, "gets {} puts {}", gets, puts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_request_errors() {
        let stage = StageCatalog::builtin()
            .build(
                &StageSpec::new("TimeoutOperationsTest")
                    .with_property("operation_timeout_ms", 10)
                    .with_property("num_threads_per_worker", 2)
                    .with_property("ops_per_thread", 5),
            )
            .unwrap();
        let mut ctx = context(MemoryServiceConfig::default().with_latency(Duration::from_millis(50))).await;
        let output = stage.execute_on_worker(&mut ctx).await.unwrap();

        let total = output
            .payload
            .statistics()
            .unwrap()
            .group_total(TIMEOUT_OPERATIONS_TOTAL)
            .unwrap();
        assert_eq!(total.errors, 10);
        assert_eq!(total.requests, 0);
    }

    #[test]
    fn test_all_zero_ratios_rejected() {
        let result = StageCatalog::builtin().build(
            &StageSpec::new("TimeoutOperationsTest")
                .with_property("get_ratio", 0)
                .with_property("put_ratio", 0),
        );
        assert!(matches!(result, Err(HarnessError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_temporal_stage_mixes_operations() {
        let stage = StageCatalog::builtin()
            .build(
                &StageSpec::new("TemporalOperationsTest")
                    .with_property("put_with_lifespan_ratio", 1)
                    .with_property("put_if_absent_with_lifespan_and_max_idle_ratio", 1)
                    .with_property("get_and_put_with_lifespan_ratio", 1)
                    .with_property("num_threads_per_worker", 2)
                    .with_property("ops_per_thread", 100)
                    .with_property("seed", 5),
            )
            .unwrap();
        let mut ctx = context(MemoryServiceConfig::default()).await;
        let output = stage.execute_on_worker(&mut ctx).await.unwrap();

        let statistics = output.payload.statistics().unwrap();
        assert_eq!(statistics.total_requests(), 200);
        for name in [
            "TemporalOperations.PutWithLifespan",
            "TemporalOperations.PutIfAbsentWithLifespanAndMaxIdle",
            "TemporalOperations.GetAndPutWithLifespan",
        ] {
            assert!(statistics.operation(name).is_some(), "{} missing", name);
        }
        assert!(statistics.operation("TemporalOperations.PutWithLifespanAndMaxIdle").is_none());
    }
}
