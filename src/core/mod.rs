//! Load-generation engine shared by every workload stage
//!
//! - `Operation` / `Invocation`: named operations and single requests
//! - `OperationSelector`: weighted choice of the next operation
//! - `Completion`: when stressors stop
//! - `Statistics` / `Timeline`: what a run records
//! - `Stressor`: the request loop itself

pub mod completion;
pub mod config;
pub mod invocation;
pub mod operation;
pub mod selector;
pub mod statistics;
pub mod stressor;
pub mod timeline;

pub use completion::{Completion, OperationCountCompletion, StopSignal, TimeStressorCompletion};
pub use config::{CoordinatorConfig, WorkerConfig};
pub use invocation::Invocation;
pub use operation::Operation;
pub use selector::OperationSelector;
pub use statistics::{OperationStats, OperationSummary, Statistics};
pub use stressor::{LogicError, OperationLogic, Requester, Stressor, StressorContext, StressorReport};
pub use timeline::{Category, CategoryType, Event, Timeline, TimelineSnapshot};
