//! Invocation wrappers for every built-in adapter operation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{
    strong_counter_ops, temporal_ops, timeout_ops, weak_counter_ops, AdapterError, Expiry,
    StrongCounter, TemporalCache, TimeoutCache, WeakCounter,
};
use crate::core::{Invocation, Operation};

pub struct IncrementAndGet(pub Arc<dyn StrongCounter>);

#[async_trait]
impl Invocation for IncrementAndGet {
    type Output = i64;

    fn operation(&self) -> Operation {
        *strong_counter_ops::INCREMENT_AND_GET
    }

    async fn invoke(self) -> Result<i64, AdapterError> {
        self.0.increment_and_get().await
    }
}

pub struct DecrementAndGet(pub Arc<dyn StrongCounter>);

#[async_trait]
impl Invocation for DecrementAndGet {
    type Output = i64;

    fn operation(&self) -> Operation {
        *strong_counter_ops::DECREMENT_AND_GET
    }

    async fn invoke(self) -> Result<i64, AdapterError> {
        self.0.decrement_and_get().await
    }
}

pub struct AddAndGet {
    pub counter: Arc<dyn StrongCounter>,
    pub delta: i64,
}

#[async_trait]
impl Invocation for AddAndGet {
    type Output = i64;

    fn operation(&self) -> Operation {
        *strong_counter_ops::ADD_AND_GET
    }

    async fn invoke(self) -> Result<i64, AdapterError> {
        self.counter.add_and_get(self.delta).await
    }
}

pub struct CompareAndSet {
    pub counter: Arc<dyn StrongCounter>,
    pub expect: i64,
    pub update: i64,
}

#[async_trait]
impl Invocation for CompareAndSet {
    type Output = bool;

    fn operation(&self) -> Operation {
        *strong_counter_ops::COMPARE_AND_SET
    }

    async fn invoke(self) -> Result<bool, AdapterError> {
        self.counter.compare_and_set(self.expect, self.update).await
    }
}

pub struct WeakAdd {
    pub counter: Arc<dyn WeakCounter>,
    pub delta: i64,
}

#[async_trait]
impl Invocation for WeakAdd {
    type Output = ();

    fn operation(&self) -> Operation {
        *weak_counter_ops::ADD
    }

    async fn invoke(self) -> Result<(), AdapterError> {
        self.counter.add(self.delta).await
    }
}

/// Add followed by a read of the (eventually consistent) value
pub struct WeakAddGetValue {
    pub counter: Arc<dyn WeakCounter>,
    pub delta: i64,
}

#[async_trait]
impl Invocation for WeakAddGetValue {
    type Output = i64;

    fn operation(&self) -> Operation {
        *weak_counter_ops::ADD_GET_VALUE
    }

    async fn invoke(self) -> Result<i64, AdapterError> {
        self.counter.add(self.delta).await?;
        self.counter.get_value().await
    }
}

pub struct GetWithTimeout {
    pub cache: Arc<dyn TimeoutCache>,
    pub key: String,
    pub timeout: Duration,
}

#[async_trait]
impl Invocation for GetWithTimeout {
    type Output = Option<Vec<u8>>;

    fn operation(&self) -> Operation {
        *timeout_ops::GET
    }

    fn tx_operation(&self) -> Operation {
        *timeout_ops::GET_TX
    }

    async fn invoke(self) -> Result<Option<Vec<u8>>, AdapterError> {
        self.cache.get(&self.key, self.timeout).await
    }
}

pub struct PutWithTimeout {
    pub cache: Arc<dyn TimeoutCache>,
    pub key: String,
    pub value: Vec<u8>,
    pub timeout: Duration,
}

#[async_trait]
impl Invocation for PutWithTimeout {
    type Output = ();

    fn operation(&self) -> Operation {
        *timeout_ops::PUT
    }

    fn tx_operation(&self) -> Operation {
        *timeout_ops::PUT_TX
    }

    async fn invoke(self) -> Result<(), AdapterError> {
        self.cache.put(self.key, self.value, self.timeout).await
    }
}

/// Temporal writes are recorded under the lifespan-only or the
/// lifespan-and-max-idle operation depending on the expiry they carry
pub struct PutWithLifespan {
    pub cache: Arc<dyn TemporalCache>,
    pub key: String,
    pub value: Vec<u8>,
    pub expiry: Expiry,
}

#[async_trait]
impl Invocation for PutWithLifespan {
    type Output = ();

    fn operation(&self) -> Operation {
        if self.expiry.max_idle.is_some() {
            *temporal_ops::PUT_WITH_LIFESPAN_AND_MAXIDLE
        } else {
            *temporal_ops::PUT_WITH_LIFESPAN
        }
    }

    async fn invoke(self) -> Result<(), AdapterError> {
        self.cache.put(self.key, self.value, self.expiry).await
    }
}

pub struct GetAndPutWithLifespan {
    pub cache: Arc<dyn TemporalCache>,
    pub key: String,
    pub value: Vec<u8>,
    pub expiry: Expiry,
}

#[async_trait]
impl Invocation for GetAndPutWithLifespan {
    type Output = Option<Vec<u8>>;

    fn operation(&self) -> Operation {
        if self.expiry.max_idle.is_some() {
            *temporal_ops::GET_AND_PUT_WITH_LIFESPAN_AND_MAXIDLE
        } else {
            *temporal_ops::GET_AND_PUT_WITH_LIFESPAN
        }
    }

    async fn invoke(self) -> Result<Option<Vec<u8>>, AdapterError> {
        self.cache.get_and_put(self.key, self.value, self.expiry).await
    }
}

pub struct PutIfAbsentWithLifespan {
    pub cache: Arc<dyn TemporalCache>,
    pub key: String,
    pub value: Vec<u8>,
    pub expiry: Expiry,
}

#[async_trait]
impl Invocation for PutIfAbsentWithLifespan {
    type Output = bool;

    fn operation(&self) -> Operation {
        if self.expiry.max_idle.is_some() {
            *temporal_ops::PUT_IF_ABSENT_WITH_LIFESPAN_AND_MAXIDLE
        } else {
            *temporal_ops::PUT_IF_ABSENT_WITH_LIFESPAN
        }
    }

    async fn invoke(self) -> Result<bool, AdapterError> {
        self.cache.put_if_absent(self.key, self.value, self.expiry).await
    }
}
