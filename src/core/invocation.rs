//! Invocation abstraction: one concrete request against the adapter

use async_trait::async_trait;

use super::operation::Operation;
use crate::adapter::AdapterError;

/// One concrete request of an [`Operation`]
///
/// `invoke` consumes the invocation and resolves once the adapter call has
/// completed. For adapters that hand back futures, resolution means the
/// future itself has completed, so measured latency covers the whole call.
#[async_trait]
pub trait Invocation: Send {
    /// Result produced by a successful invocation
    type Output: Send;

    /// Operation this request is recorded under
    fn operation(&self) -> Operation;

    /// Operation recorded when the request runs inside a transaction
    fn tx_operation(&self) -> Operation {
        self.operation()
    }

    /// Dispatch the request to the adapter
    async fn invoke(self) -> Result<Self::Output, AdapterError>;
}
