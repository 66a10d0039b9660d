//! Testing utilities for cluster integration tests
//!
//! Provides `TestCluster` for spinning up in-process workers that share one
//! in-memory service, reachable either through channels or over real HTTP.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::adapter::{Lifecycle as _, MemoryService, MemoryServiceConfig};
use crate::cluster::{Coordinator, Worker, WorkerHandle};
use crate::core::{CoordinatorConfig, WorkerConfig};
use crate::transport::{create_router, HttpTransport, InMemoryTransport};

/// A single test worker
pub struct TestWorker {
    pub handle: WorkerHandle,
    /// HTTP address, for clusters started with `with_http`
    pub addr: Option<SocketAddr>,
    /// HTTP server shutdown channel
    http_shutdown_tx: Option<oneshot::Sender<()>>,
}

/// A cluster of in-process workers over one shared in-memory service
pub struct TestCluster {
    pub workers: Vec<TestWorker>,
    pub service: Arc<MemoryService>,
}

impl TestCluster {
    /// Create and start a cluster of `count` workers reachable in memory
    pub async fn new(count: usize) -> Self {
        Self::with_service_config(count, MemoryServiceConfig::default()).await
    }

    pub async fn with_service_config(count: usize, config: MemoryServiceConfig) -> Self {
        let service = MemoryService::new(config);
        let workers = (0..count)
            .map(|index| TestWorker {
                handle: Self::start_worker(&service, index, count),
                addr: None,
                http_shutdown_tx: None,
            })
            .collect();

        TestCluster { workers, service }
    }

    /// Create and start a cluster whose workers serve HTTP on 127.0.0.1
    pub async fn with_http(count: usize) -> Self {
        let service = MemoryService::new(MemoryServiceConfig::default());
        let mut workers = Vec::with_capacity(count);

        for index in 0..count {
            let handle = Self::start_worker(&service, index, count);
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = create_router(handle.clone());

            let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel();

            // Spawn the HTTP server with graceful shutdown
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = http_shutdown_rx.await;
                    })
                    .await
                    .unwrap();
            });

            workers.push(TestWorker {
                handle,
                addr: Some(addr),
                http_shutdown_tx: Some(http_shutdown_tx),
            });
        }

        // Give servers time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        TestCluster { workers, service }
    }

    fn start_worker(service: &Arc<MemoryService>, index: usize, count: usize) -> WorkerHandle {
        let config = WorkerConfig::new(index, count).with_progress_interval(Duration::from_secs(1));
        Worker::new(config, service.capabilities()).start()
    }

    /// Start the shared service directly, for tests without a `ServiceStart` stage
    pub async fn start_service(&self) {
        self.service.start().await.unwrap();
    }

    pub fn handles(&self) -> Vec<WorkerHandle> {
        self.workers.iter().map(|w| w.handle.clone()).collect()
    }

    /// Coordinator reaching the workers through channels
    pub fn coordinator(&self) -> Coordinator<InMemoryTransport> {
        self.coordinator_with_config(CoordinatorConfig::default())
    }

    pub fn coordinator_with_config(&self, config: CoordinatorConfig) -> Coordinator<InMemoryTransport> {
        Coordinator::with_config(InMemoryTransport::new(self.handles()), config)
    }

    /// Coordinator reaching the workers over HTTP; panics unless started `with_http`
    pub fn http_coordinator(&self) -> Coordinator<HttpTransport> {
        let peers: BTreeMap<usize, String> = self
            .workers
            .iter()
            .map(|w| {
                let addr = w.addr.expect("cluster started without HTTP");
                (w.handle.worker_index(), addr.to_string())
            })
            .collect();
        Coordinator::new(HttpTransport::new(peers, Duration::from_secs(2)))
    }

    /// Shutdown all workers gracefully
    pub async fn shutdown(mut self) {
        for worker in &mut self.workers {
            if let Some(tx) = worker.http_shutdown_tx.take() {
                let _ = tx.send(());
            }
            worker.handle.shutdown().await;
        }
        // Give workers time to shutdown
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
