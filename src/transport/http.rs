//! HTTP transport between the coordinator and remote workers
//!
//! Uses axum for the worker's server and reqwest for the coordinator's client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::warn;

use crate::cluster::{WorkerHandle, WorkerStatus};
use crate::stage::{StageAck, StageSpec};
use crate::transport::{TransportError, WorkerTransport};

/// HTTP transport for coordinator to worker communication
pub struct HttpTransport {
    /// Map of worker index to address (e.g., "127.0.0.1:7001")
    peers: BTreeMap<usize, String>,
    client: reqwest::Client,
    /// Timeout of stop and status requests; stage requests are bounded by
    /// the coordinator's stage timeout instead
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport with worker addresses
    pub fn new(peers: BTreeMap<usize, String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        HttpTransport {
            peers,
            client,
            request_timeout,
        }
    }

    fn url(&self, worker: usize, path: &str) -> Result<String, TransportError> {
        let addr = self
            .peers
            .get(&worker)
            .ok_or(TransportError::WorkerNotFound(worker))?;
        Ok(format!("http://{}{}", addr, path))
    }
}

fn send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::ConnectionFailed
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(TransportError::ConnectionFailed);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Protocol(format!("worker responded {}: {}", status, body)));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

#[async_trait]
impl WorkerTransport for HttpTransport {
    fn workers(&self) -> Vec<usize> {
        self.peers.keys().copied().collect()
    }

    async fn execute_stage(&self, worker: usize, spec: StageSpec) -> Result<StageAck, TransportError> {
        let url = self.url(worker, "/worker/stage")?;
        let response = self
            .client
            .post(&url)
            .json(&spec)
            .send()
            .await
            .map_err(send_error)?;

        read_json(response).await
    }

    async fn stop_stressors(&self, worker: usize) -> Result<(), TransportError> {
        let url = self.url(worker, "/worker/stop")?;
        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(send_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Protocol(format!("worker responded {}", response.status())))
        }
    }

    async fn status(&self, worker: usize) -> Result<WorkerStatus, TransportError> {
        let url = self.url(worker, "/worker/status")?;
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(send_error)?;

        read_json(response).await
    }
}

/// Create an axum router serving a worker's stage requests
pub fn create_router(handle: WorkerHandle) -> Router {
    Router::new()
        .route("/worker/stage", post(handle_stage))
        .route("/worker/stop", post(handle_stop))
        .route("/worker/status", get(handle_status))
        .with_state(handle)
}

async fn handle_stage(
    State(handle): State<WorkerHandle>,
    Json(spec): Json<StageSpec>,
) -> Result<Json<StageAck>, (StatusCode, String)> {
    match handle.execute(spec).await {
        Ok(ack) => Ok(Json(ack)),
        Err(e) => {
            warn!(worker = handle.worker_index(), error = %e, "Stage request rejected");
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

async fn handle_stop(State(handle): State<WorkerHandle>) -> StatusCode {
    handle.stop_stressors();
    StatusCode::OK
}

async fn handle_status(State(handle): State<WorkerHandle>) -> Json<WorkerStatus> {
    Json(handle.status())
}
