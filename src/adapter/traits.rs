//! Capability traits a service adapter may implement
//!
//! Each capability exposes a set of operations registered in the global
//! catalog as `<Trait>.<Operation>`.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::Operation;

/// Failure of a single adapter call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The call did not finish within its timeout
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// The service has not been started or was stopped
    #[error("service is not running")]
    NotRunning,
    /// The backend reported an error
    #[error("backend error: {0}")]
    Backend(String),
    /// The backend does not support the requested call
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Start/stop of the service under test
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn stop(&self) -> Result<(), AdapterError>;
    fn is_running(&self) -> bool;
}

/// Factory for strongly consistent counters
pub trait StrongCounterOperations: Send + Sync {
    fn strong_counter(&self, name: &str) -> Result<Arc<dyn StrongCounter>, AdapterError>;
}

/// A linearizable counter; every mutation resolves to the value it produced
#[async_trait]
pub trait StrongCounter: Send + Sync {
    async fn increment_and_get(&self) -> Result<i64, AdapterError>;
    async fn decrement_and_get(&self) -> Result<i64, AdapterError>;
    async fn add_and_get(&self, delta: i64) -> Result<i64, AdapterError>;
    async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool, AdapterError>;
    async fn get_value(&self) -> Result<i64, AdapterError>;
    async fn reset(&self) -> Result<(), AdapterError>;
}

/// Factory for eventually consistent counters
pub trait WeakCounterOperations: Send + Sync {
    fn weak_counter(&self, name: &str) -> Result<Arc<dyn WeakCounter>, AdapterError>;
}

#[async_trait]
pub trait WeakCounter: Send + Sync {
    async fn add(&self, delta: i64) -> Result<(), AdapterError>;
    async fn get_value(&self) -> Result<i64, AdapterError>;
    async fn reset(&self) -> Result<(), AdapterError>;
}

/// Factory for caches whose calls carry an explicit timeout
pub trait TimeoutOperations: Send + Sync {
    fn cache(&self, name: &str) -> Result<Arc<dyn TimeoutCache>, AdapterError>;
}

/// Cache calls that fail with [`AdapterError::Timeout`] once `timeout` elapses
#[async_trait]
pub trait TimeoutCache: Send + Sync {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, AdapterError>;
    async fn put(&self, key: String, value: Vec<u8>, timeout: Duration) -> Result<(), AdapterError>;
}

/// Expiration settings of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Expiry {
    /// Maximum time the entry lives after being written
    pub lifespan: Option<Duration>,
    /// Maximum time the entry lives without being accessed
    pub max_idle: Option<Duration>,
}

impl Expiry {
    /// Build from millisecond settings where a negative value means unlimited
    pub fn from_millis(lifespan_ms: i64, max_idle_ms: Option<i64>) -> Self {
        let to_duration = |ms: i64| (ms >= 0).then(|| Duration::from_millis(ms as u64));
        Self {
            lifespan: to_duration(lifespan_ms),
            max_idle: max_idle_ms.and_then(to_duration),
        }
    }
}

/// Factory for caches with per-entry expiration
pub trait TemporalOperations: Send + Sync {
    fn cache(&self, name: &str) -> Result<Arc<dyn TemporalCache>, AdapterError>;
}

#[async_trait]
pub trait TemporalCache: Send + Sync {
    async fn put(&self, key: String, value: Vec<u8>, expiry: Expiry) -> Result<(), AdapterError>;
    /// Store the value and return the previous one
    async fn get_and_put(&self, key: String, value: Vec<u8>, expiry: Expiry) -> Result<Option<Vec<u8>>, AdapterError>;
    /// Store the value unless a live entry exists; true if stored
    async fn put_if_absent(&self, key: String, value: Vec<u8>, expiry: Expiry) -> Result<bool, AdapterError>;
}

/// Services able to group requests into transactions
#[async_trait]
pub trait Transactional: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AdapterError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> Result<(), AdapterError>;
    async fn rollback(self: Box<Self>) -> Result<(), AdapterError>;
}

/// Client connection settings of a live service
#[async_trait]
pub trait ConnectionSettings: Send + Sync {
    fn socket_timeout(&self) -> Duration;
    /// Apply a new socket timeout and reinitialize the connections
    async fn reconfigure_socket_timeout(&self, timeout: Duration) -> Result<(), AdapterError>;
}

macro_rules! operations {
    ($(#[$meta:meta])* $module:ident, $prefix:literal, { $($name:ident => $op:literal),+ $(,)? }) => {
        $(#[$meta])*
        pub mod $module {
            use super::*;
            $(
                pub static $name: LazyLock<Operation> =
                    LazyLock::new(|| Operation::builtin(concat!($prefix, ".", $op)));
            )+

            pub(crate) fn register() {
                $( LazyLock::force(&$name); )+
            }
        }
    };
}

operations!(
    /// Operations of [`StrongCounterOperations`]
    strong_counter_ops, "StrongCounterOperations", {
        INCREMENT_AND_GET => "IncrementAndGet",
        DECREMENT_AND_GET => "DecrementAndGet",
        ADD_AND_GET => "AddAndGet",
        COMPARE_AND_SET => "CompareAndSet",
    }
);

operations!(
    /// Operations of [`WeakCounterOperations`]
    weak_counter_ops, "WeakCounterOperations", {
        ADD => "Add",
        ADD_GET_VALUE => "AddGetValue",
    }
);

operations!(
    /// Operations of [`TimeoutOperations`]
    timeout_ops, "TimeoutOperations", {
        GET => "Get",
        GET_TX => "GetTx",
        PUT => "Put",
        PUT_TX => "PutTx",
    }
);

operations!(
    /// Operations of [`TemporalOperations`]
    temporal_ops, "TemporalOperations", {
        PUT_WITH_LIFESPAN => "PutWithLifespan",
        PUT_WITH_LIFESPAN_AND_MAXIDLE => "PutWithLifespanAndMaxIdle",
        GET_AND_PUT_WITH_LIFESPAN => "GetAndPutWithLifespan",
        GET_AND_PUT_WITH_LIFESPAN_AND_MAXIDLE => "GetAndPutWithLifespanAndMaxIdle",
        PUT_IF_ABSENT_WITH_LIFESPAN => "PutIfAbsentWithLifespan",
        PUT_IF_ABSENT_WITH_LIFESPAN_AND_MAXIDLE => "PutIfAbsentWithLifespanAndMaxIdle",
    }
);

operations!(
    /// Operations recorded for transaction boundaries
    transactional_ops, "Transactional", {
        COMMIT => "Commit",
        ROLLBACK => "Rollback",
    }
);

/// Register every built-in operation in the catalog
///
/// Called once at worker start so that user-registered operations cannot
/// take a built-in name.
pub fn register_builtin_operations() {
    strong_counter_ops::register();
    weak_counter_ops::register();
    timeout_ops::register();
    temporal_ops::register();
    transactional_ops::register();
}
