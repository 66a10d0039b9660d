//! Adapter boundary between the harness and the service under test
//!
//! - `traits`: capability traits and their registered operations
//! - `registry`: `Capabilities`, the per-worker dependency registry
//! - `invocations`: one `Invocation` type per built-in operation
//! - `memory`: `MemoryService`, an in-process implementation of everything

pub mod invocations;
pub mod memory;
pub mod registry;
pub mod traits;

pub use memory::{MemoryService, MemoryServiceConfig};
pub use registry::{Capabilities, Capability};
pub use traits::{
    register_builtin_operations, strong_counter_ops, temporal_ops, timeout_ops, transactional_ops,
    weak_counter_ops, AdapterError, ConnectionSettings, Expiry, Lifecycle, StrongCounter,
    StrongCounterOperations, TemporalCache, TemporalOperations, TimeoutCache, TimeoutOperations,
    Transaction, Transactional, WeakCounter, WeakCounterOperations,
};
