//! Stressor: one concurrent load-generation task

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::completion::{Completion, StopSignal};
use super::invocation::Invocation;
use super::operation::Operation;
use super::selector::OperationSelector;
use super::statistics::Statistics;
use super::timeline::Timeline;
use crate::adapter::{transactional_ops, AdapterError, Capabilities, Transaction, Transactional};

/// Failure reported by an [`OperationLogic`]
#[derive(Error, Debug)]
pub enum LogicError {
    /// The adapter rejected a request; counted and the loop continues
    #[error("request failed: {0}")]
    Request(#[from] AdapterError),
    /// The logic was handed an operation it does not implement
    #[error("unknown operation {0}")]
    UnknownOperation(Operation),
    /// A result contradicted what this stressor observed earlier
    #[error("consistency violation: {0}")]
    Consistency(String),
    /// The logic could not prepare itself
    #[error("logic init failed: {0}")]
    Init(String),
}

impl LogicError {
    /// Whether this error aborts the stressor
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LogicError::Request(_))
    }
}

/// Everything a logic may look at while initializing
#[derive(Clone)]
pub struct StressorContext {
    pub worker_index: usize,
    /// Index of the stressor across the whole cluster
    pub global_index: usize,
    pub capabilities: Capabilities,
    pub timeline: Arc<Timeline>,
}

/// Strategy executing one request per call
#[async_trait]
pub trait OperationLogic: Send {
    /// Resolve adapter handles and decide whether transactions are used
    async fn init(&mut self, context: &StressorContext, requester: &mut Requester) -> Result<(), LogicError>;

    /// Build and dispatch exactly one invocation of `operation`
    async fn run(&mut self, operation: Operation, requester: &mut Requester) -> Result<(), LogicError>;
}

/// Per-stressor request machinery: random stream, statistics and the
/// transaction scope
pub struct Requester {
    rng: StdRng,
    statistics: Statistics,
    transactional: Option<Arc<dyn Transactional>>,
    use_transactions: bool,
    transaction_size: usize,
    current: Option<Box<dyn Transaction>>,
    tx_requests: usize,
}

impl Requester {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            statistics: Statistics::new(),
            transactional: None,
            use_transactions: false,
            transaction_size: 1,
            current: None,
            tx_requests: 0,
        }
    }

    /// Group requests `size` at a time into transactions of `transactional`
    pub fn with_transactions(mut self, transactional: Arc<dyn Transactional>, size: usize) -> Self {
        self.transactional = Some(transactional);
        self.use_transactions = true;
        self.transaction_size = size.max(1);
        self
    }

    /// Turn transactions off (or back on, if the service supports them)
    pub fn set_use_transactions(&mut self, enabled: bool) {
        self.use_transactions = enabled;
    }

    pub fn uses_transactions(&self) -> bool {
        self.use_transactions && self.transactional.is_some()
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Dispatch `invocation` and record its outcome
    ///
    /// Latency is measured from dispatch until the awaited result resolves.
    pub async fn make_request<I: Invocation>(&mut self, invocation: I) -> Result<I::Output, AdapterError> {
        let in_tx = self.uses_transactions();
        let operation = if in_tx {
            invocation.tx_operation()
        } else {
            invocation.operation()
        };

        if in_tx && self.current.is_none() {
            if let Some(transactional) = &self.transactional {
                match transactional.begin().await {
                    Ok(tx) => self.current = Some(tx),
                    Err(e) => {
                        self.statistics.record_error(operation);
                        return Err(e);
                    }
                }
            }
        }

        let start = Instant::now();
        match invocation.invoke().await {
            Ok(output) => {
                self.statistics.record_request(operation, start.elapsed());
                if in_tx {
                    self.tx_requests += 1;
                    if self.tx_requests >= self.transaction_size {
                        self.commit().await;
                    }
                }
                Ok(output)
            }
            Err(e) => {
                self.statistics.record_error(operation);
                if in_tx {
                    self.rollback().await;
                }
                Err(e)
            }
        }
    }

    async fn commit(&mut self) {
        self.tx_requests = 0;
        let Some(tx) = self.current.take() else {
            return;
        };
        let start = Instant::now();
        match tx.commit().await {
            Ok(()) => self
                .statistics
                .record_request(*transactional_ops::COMMIT, start.elapsed()),
            Err(e) => {
                debug!(error = %e, "Commit failed");
                self.statistics.record_error(*transactional_ops::COMMIT);
            }
        }
    }

    async fn rollback(&mut self) {
        self.tx_requests = 0;
        let Some(tx) = self.current.take() else {
            return;
        };
        let start = Instant::now();
        match tx.rollback().await {
            Ok(()) => self
                .statistics
                .record_request(*transactional_ops::ROLLBACK, start.elapsed()),
            Err(e) => {
                debug!(error = %e, "Rollback failed");
                self.statistics.record_error(*transactional_ops::ROLLBACK);
            }
        }
    }

    /// Commit a partially filled transaction at the end of the stage
    pub async fn finish(&mut self) {
        if self.current.is_some() {
            self.commit().await;
        }
    }
}

/// Outcome of one stressor after its loop ended
pub struct StressorReport<L> {
    pub global_index: usize,
    pub logic: L,
    pub statistics: Statistics,
    pub executed: u64,
    /// Set when the stressor aborted
    pub fatal: Option<LogicError>,
}

/// Request loop of one stressor
pub struct Stressor<L: OperationLogic> {
    context: StressorContext,
    logic: L,
    selector: Arc<OperationSelector>,
    completion: Arc<dyn Completion>,
    stop: StopSignal,
    requester: Requester,
}

impl<L: OperationLogic> Stressor<L> {
    pub fn new(
        context: StressorContext,
        logic: L,
        selector: Arc<OperationSelector>,
        completion: Arc<dyn Completion>,
        stop: StopSignal,
        requester: Requester,
    ) -> Self {
        Self {
            context,
            logic,
            selector,
            completion,
            stop,
            requester,
        }
    }

    /// Run until the completion says stop or the stop signal is raised
    ///
    /// A fatal logic error raises the stop signal so the other stressors of
    /// the pool wind down too.
    pub async fn run(mut self) -> StressorReport<L> {
        let worker = self.context.worker_index;
        let stressor = self.context.global_index;

        if let Err(e) = self.logic.init(&self.context, &mut self.requester).await {
            error!(worker, stressor, error = %e, "Stressor init failed");
            self.stop.raise();
            return StressorReport {
                global_index: stressor,
                logic: self.logic,
                statistics: self.requester.statistics,
                executed: 0,
                fatal: Some(e),
            };
        }

        self.requester.statistics.begin();
        let mut executed = 0u64;
        let fatal = loop {
            if self.stop.is_raised() || !self.completion.more_to_run() {
                break None;
            }

            let operation = self.selector.next(self.requester.rng());
            match self.logic.run(operation, &mut self.requester).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(worker, stressor, %operation, error = %e, "Stressor aborted");
                    self.stop.raise();
                    break Some(e);
                }
                Err(e) => {
                    debug!(worker, stressor, %operation, error = %e, "Request failed");
                }
            }

            executed += 1;
            self.completion.log_progress(executed);
            tokio::task::yield_now().await;
        };

        self.requester.finish().await;
        self.requester.statistics.end();

        if fatal.is_none() && self.stop.is_raised() {
            warn!(worker, stressor, executed, "Stressor stopped by signal");
        } else {
            debug!(worker, stressor, executed, "Stressor finished");
        }

        StressorReport {
            global_index: stressor,
            logic: self.logic,
            statistics: self.requester.statistics,
            executed,
            fatal,
        }
    }
}
