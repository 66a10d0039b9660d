//! Stressor logic of the built-in workload stages

use async_trait::async_trait;

use super::cache::{TemporalLogic, TimeoutLogic};
use super::strong_counter::StrongCounterLogic;
use super::weak_counter::WeakCounterLogic;
use crate::core::{LogicError, Operation, OperationLogic, Requester, StressorContext};

/// Operation logic of every built-in workload, one variant per stage
pub enum Logic {
    StrongCounter(StrongCounterLogic),
    WeakCounter(WeakCounterLogic),
    Timeout(TimeoutLogic),
    Temporal(TemporalLogic),
}

#[async_trait]
impl OperationLogic for Logic {
    async fn init(&mut self, context: &StressorContext, requester: &mut Requester) -> Result<(), LogicError> {
        match self {
            Logic::StrongCounter(logic) => logic.init(context, requester).await,
            Logic::WeakCounter(logic) => logic.init(context, requester).await,
            Logic::Timeout(logic) => logic.init(context, requester).await,
            Logic::Temporal(logic) => logic.init(context, requester).await,
        }
    }

    async fn run(&mut self, operation: Operation, requester: &mut Requester) -> Result<(), LogicError> {
        match self {
            Logic::StrongCounter(logic) => logic.run(operation, requester).await,
            Logic::WeakCounter(logic) => logic.run(operation, requester).await,
            Logic::Timeout(logic) => logic.run(operation, requester).await,
            Logic::Temporal(logic) => logic.run(operation, requester).await,
        }
    }
}
