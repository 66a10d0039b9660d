//! Consistency checks run on the coordinator after a stage
//!
//! - `CounterHistory`: counter values observed across the cluster
//! - `CounterChecker`: duplicate and gap detection

pub mod counter;
pub mod history;

pub use counter::{CheckResult, CounterChecker};
pub use history::{CounterHistory, Observation, ValueSequence};
