//! Transport layer between the coordinator and its workers
//!
//! - `InMemoryTransport`: Channel-based transport to in-process workers
//! - `HttpTransport`: HTTP/JSON transport to remote workers

pub mod http;
pub mod inmemory;
pub mod traits;

pub use http::{create_router, HttpTransport};
pub use inmemory::InMemoryTransport;
pub use traits::{TransportError, WorkerTransport};
