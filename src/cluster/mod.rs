//! Coordinator and worker roles of a distributed run
//!
//! - `Worker`: server loop executing stages against the local service
//! - `Coordinator`: broadcasts stages, aggregates acknowledgements

pub mod coordinator;
pub mod worker;

pub use coordinator::{Coordinator, RunReport, StageReport};
pub use worker::{Worker, WorkerHandle, WorkerStatus, STAGES_CATEGORY};
