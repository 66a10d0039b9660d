//! loadstage - distributed stage-driven benchmarking harness
//!
//! A coordinator drives a cluster of workers through an ordered list of
//! stages. Workload stages spawn stressor pools that issue weighted random
//! operations against a pluggable service and record latency statistics;
//! the coordinator merges the results and checks cross-worker consistency.

pub mod adapter;
pub mod checker;
pub mod cluster;
pub mod core;
pub mod error;
pub mod logging;
pub mod stage;
pub mod transport;

/// Testing utilities for integration tests.
pub mod testing;

pub use error::{HarnessError, Result};
