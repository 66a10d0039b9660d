//! Stressor pool shared by every workload stage

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::context::WorkerContext;
use super::spec::{PropertyDescriptor, PropertyKind};
use crate::core::timeline::now_millis;
use crate::core::{
    Category, Completion, Event, LogicError, OperationCountCompletion, OperationLogic, OperationSelector,
    Requester, Statistics, Stressor, StressorContext, StressorReport, TimeStressorCompletion,
};
use crate::error::{HarnessError, Result};

/// Settings every workload stage accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSettings {
    pub num_threads_per_worker: usize,
    /// 0 runs until the stage is stopped externally
    pub duration_ms: u64,
    /// Per-stressor operation limit; takes precedence over `duration_ms`
    pub ops_per_thread: Option<u64>,
    pub use_transactions: bool,
    pub transaction_size: usize,
    /// Base seed of the stressors' random streams
    pub seed: Option<u64>,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            num_threads_per_worker: 10,
            duration_ms: 0,
            ops_per_thread: None,
            use_transactions: false,
            transaction_size: 1,
            seed: None,
        }
    }
}

impl TestSettings {
    /// Property descriptors of the common settings
    pub fn properties() -> Vec<PropertyDescriptor> {
        let defaults = Self::default();
        vec![
            PropertyDescriptor::with_default(
                "num_threads_per_worker",
                PropertyKind::Integer,
                defaults.num_threads_per_worker,
                "Number of stressors on each worker",
            ),
            PropertyDescriptor::with_default(
                "duration_ms",
                PropertyKind::Integer,
                defaults.duration_ms,
                "Test duration in milliseconds; 0 runs until stopped",
            ),
            PropertyDescriptor::optional(
                "ops_per_thread",
                PropertyKind::Integer,
                "Number of operations each stressor issues",
            ),
            PropertyDescriptor::with_default(
                "use_transactions",
                PropertyKind::Boolean,
                defaults.use_transactions,
                "Group requests into transactions when the service supports it",
            ),
            PropertyDescriptor::with_default(
                "transaction_size",
                PropertyKind::Integer,
                defaults.transaction_size,
                "Requests per transaction",
            ),
            PropertyDescriptor::optional("seed", PropertyKind::Integer, "Base random seed"),
        ]
    }

    pub fn validate(&self, stage: &str) -> Result<()> {
        if self.num_threads_per_worker == 0 {
            return Err(HarnessError::invalid_config(stage, "num_threads_per_worker must be positive"));
        }
        if self.transaction_size == 0 {
            return Err(HarnessError::invalid_config(stage, "transaction_size must be positive"));
        }
        Ok(())
    }
}

/// Result of a stressor pool run on one worker
pub struct WorkloadRun<L> {
    pub reports: Vec<StressorReport<L>>,
    /// All stressor statistics merged
    pub statistics: Statistics,
}

/// Spawn the stressor pool of a stage and wait for every stressor
///
/// `make_logic` is called once per stressor with its local index. A fatal
/// error in any stressor fails the whole run.
pub async fn run_workload<L, F>(
    ctx: &WorkerContext,
    stage: &str,
    settings: &TestSettings,
    selector: OperationSelector,
    mut make_logic: F,
) -> Result<WorkloadRun<L>>
where
    L: OperationLogic + 'static,
    F: FnMut(usize) -> L,
{
    let worker = ctx.worker_index();
    let threads = settings.num_threads_per_worker;
    let selector = Arc::new(selector);
    let seed = settings.seed.unwrap_or_else(rand::random);

    let stage_name = stage.to_string();
    let shared: Arc<dyn Completion> = Arc::new(
        TimeStressorCompletion::with_handler(
            Duration::from_millis(settings.duration_ms),
            Some(Box::new(move || info!(worker, stage = %stage_name, "Test duration elapsed"))),
        )
        .with_progress_interval(ctx.config.progress_interval),
    );
    if settings.ops_per_thread.is_none() && settings.duration_ms == 0 {
        warn!(worker, stage, "No duration or operation limit, stressors run until stopped");
    }

    let transactional = if settings.use_transactions {
        let transactional = ctx.capabilities.transactional();
        if transactional.is_none() {
            warn!(worker, stage, "Service is not transactional, running without transactions");
        }
        transactional
    } else {
        None
    };

    info!(worker, stage, threads, seed, "Starting stressors");
    let started = now_millis();
    let mut handles = Vec::with_capacity(threads);
    for index in 0..threads {
        let global_index = worker * threads + index;
        let completion: Arc<dyn Completion> = match settings.ops_per_thread {
            Some(limit) => Arc::new(
                OperationCountCompletion::new(limit).with_progress_interval(ctx.config.progress_interval),
            ),
            None => shared.clone(),
        };

        let mut requester = Requester::new(StdRng::seed_from_u64(seed.wrapping_add(global_index as u64)));
        if let Some(transactional) = &transactional {
            requester = requester.with_transactions(transactional.clone(), settings.transaction_size);
        }

        let context = StressorContext {
            worker_index: worker,
            global_index,
            capabilities: ctx.capabilities.clone(),
            timeline: ctx.timeline.clone(),
        };
        let stressor = Stressor::new(
            context,
            make_logic(index),
            selector.clone(),
            completion,
            ctx.stop.clone(),
            requester,
        );
        handles.push(tokio::spawn(stressor.run()));
    }

    let mut statistics = Statistics::new();
    let mut reports = Vec::with_capacity(threads);
    // Consistency violations and crashed tasks abort the run; a logic that
    // rejects its operations only fails this stage
    let mut aborted: Option<String> = None;
    let mut failed: Option<String> = None;
    for result in join_all(handles).await {
        match result {
            Ok(report) => {
                statistics.merge(&report.statistics);
                if let Some(fatal) = &report.fatal {
                    let message = format!("stressor {}: {}", report.global_index, fatal);
                    match fatal {
                        LogicError::UnknownOperation(_) => failed.get_or_insert(message),
                        _ => aborted.get_or_insert(message),
                    };
                }
                reports.push(report);
            }
            Err(e) => {
                aborted.get_or_insert_with(|| format!("stressor task failed: {}", e));
            }
        }
    }
    let finished = now_millis();

    let elapsed = Duration::from_millis(finished.saturating_sub(started));
    let throughput = if elapsed.is_zero() {
        0.0
    } else {
        statistics.total_requests() as f64 / elapsed.as_secs_f64()
    };
    ctx.timeline.add_event(
        Category::custom(format!("{} throughput", stage)),
        Event::Value {
            timestamp: finished,
            value: throughput,
        },
    );

    if let Some(message) = aborted {
        return Err(HarnessError::StressorAborted(message));
    }
    if let Some(message) = failed {
        return Err(HarnessError::StressorFailed(message));
    }

    info!(
        worker,
        stage,
        requests = statistics.total_requests(),
        errors = statistics.total_errors(),
        throughput,
        "Stressors finished"
    );
    Ok(WorkloadRun { reports, statistics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Capabilities;
    use crate::core::{Operation, WorkerConfig};
    use async_trait::async_trait;

    /// Fails every call with the configured error, after `ok_calls` successes
    struct ScriptedLogic {
        ok_calls: usize,
        consistency: bool,
    }

    #[async_trait]
    impl OperationLogic for ScriptedLogic {
        async fn init(
            &mut self,
            _context: &StressorContext,
            _requester: &mut Requester,
        ) -> std::result::Result<(), LogicError> {
            Ok(())
        }

        async fn run(&mut self, operation: Operation, _requester: &mut Requester) -> std::result::Result<(), LogicError> {
            if self.ok_calls > 0 {
                self.ok_calls -= 1;
                return Ok(());
            }
            if self.consistency {
                Err(LogicError::Consistency("value repeated".to_string()))
            } else {
                Err(LogicError::UnknownOperation(operation))
            }
        }
    }

    fn settings(ops: u64) -> TestSettings {
        TestSettings {
            num_threads_per_worker: 2,
            ops_per_thread: Some(ops),
            seed: Some(7),
            ..TestSettings::default()
        }
    }

    fn selector() -> OperationSelector {
        OperationSelector::single(Operation::builtin("WorkloadTest.Op"))
    }

    #[tokio::test]
    async fn test_pool_runs_every_stressor() {
        let ctx = WorkerContext::new(WorkerConfig::new(1, 2), Capabilities::new());

        let run = run_workload(&ctx, "WorkloadTest", &settings(5), selector(), |_| ScriptedLogic {
            ok_calls: usize::MAX,
            consistency: false,
        })
        .await
        .unwrap();

        assert_eq!(run.reports.len(), 2);
        assert!(run.reports.iter().all(|r| r.executed == 5));
        let mut indices: Vec<usize> = run.reports.iter().map(|r| r.global_index).collect();
        indices.sort();
        assert_eq!(indices, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_rejected_operation_fails_stage() {
        let ctx = WorkerContext::new(WorkerConfig::default(), Capabilities::new());

        let result = run_workload(&ctx, "WorkloadTest", &settings(5), selector(), |_| ScriptedLogic {
            ok_calls: 1,
            consistency: false,
        })
        .await;

        assert!(matches!(result, Err(HarnessError::StressorFailed(_))));
    }

    #[tokio::test]
    async fn test_consistency_violation_aborts_stage() {
        let ctx = WorkerContext::new(WorkerConfig::default(), Capabilities::new());

        let result = run_workload(&ctx, "WorkloadTest", &settings(5), selector(), |index| ScriptedLogic {
            ok_calls: 1,
            consistency: index == 0,
        })
        .await;

        assert!(matches!(result, Err(HarnessError::StressorAborted(message)) if message.contains("value repeated")));
    }
}
