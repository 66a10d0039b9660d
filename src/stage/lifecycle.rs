//! Service lifecycle stages and timeline collection

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::context::{WorkerContext, SERVICE_INSTANCE};
use super::spec::{PropertyDescriptor, PropertyKind, StageDescriptor};
use super::{AckPayload, Stage, WorkerOutput};
use crate::adapter::Capability;
use crate::error::{HarnessError, Result};

/// Starts the service on every worker
pub struct ServiceStartStage;

impl ServiceStartStage {
    pub const NAME: &'static str = "ServiceStart";

    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::new(Self::NAME, "Starts the service on each worker")
    }
}

#[async_trait]
impl Stage for ServiceStartStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::Lifecycle]
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        let lifecycle = ctx.capabilities.lifecycle()?;
        if lifecycle.is_running() {
            ctx.state.put(SERVICE_INSTANCE, ctx.capabilities.clone());
            return Ok(WorkerOutput::warn("service already running"));
        }

        lifecycle.start().await?;
        ctx.state.put(SERVICE_INSTANCE, ctx.capabilities.clone());
        info!(worker = ctx.worker_index(), "Service started");
        Ok(WorkerOutput::default())
    }
}

/// Stops the service on every worker
pub struct ServiceStopStage;

impl ServiceStopStage {
    pub const NAME: &'static str = "ServiceStop";

    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::new(Self::NAME, "Stops the service on each worker")
    }
}

#[async_trait]
impl Stage for ServiceStopStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::Lifecycle]
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        let lifecycle = ctx.capabilities.lifecycle()?;
        ctx.state.remove(SERVICE_INSTANCE);
        if !lifecycle.is_running() {
            return Ok(WorkerOutput::warn("service is not running"));
        }

        lifecycle.stop().await?;
        info!(worker = ctx.worker_index(), "Service stopped");
        Ok(WorkerOutput::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconfigureSocketTimeoutConfig {
    pub new_socket_timeout_ms: u64,
}

/// Changes the socket timeout of a running service
pub struct ReconfigureSocketTimeoutStage {
    timeout: Duration,
}

impl ReconfigureSocketTimeoutStage {
    pub const NAME: &'static str = "ReconfigureSocketTimeout";

    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::new(Self::NAME, "Reconfigures the socket timeout of the running service").property(
            PropertyDescriptor::required(
                "new_socket_timeout_ms",
                PropertyKind::Integer,
                "New socket timeout in milliseconds",
            ),
        )
    }

    pub fn new(config: ReconfigureSocketTimeoutConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.new_socket_timeout_ms),
        }
    }
}

#[async_trait]
impl Stage for ReconfigureSocketTimeoutStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        let Some(service) = ctx.service() else {
            return Ok(WorkerOutput::warn("no running service to reconfigure"));
        };
        let Some(settings) = service.connection_settings() else {
            info!(worker = ctx.worker_index(), "Service has no connection settings, nothing to reconfigure");
            return Ok(WorkerOutput::default());
        };

        let previous = settings.socket_timeout();
        settings
            .reconfigure_socket_timeout(self.timeout)
            .await
            .map_err(HarnessError::from)?;
        if settings.socket_timeout() != self.timeout {
            warn!(
                worker = ctx.worker_index(),
                expected = ?self.timeout,
                actual = ?settings.socket_timeout(),
                "Socket timeout not applied"
            );
            return Ok(WorkerOutput::warn(format!(
                "socket timeout is {:?} after reconfiguring to {:?}",
                settings.socket_timeout(),
                self.timeout
            )));
        }
        info!(worker = ctx.worker_index(), ?previous, current = ?self.timeout, "Socket timeout reconfigured");
        Ok(WorkerOutput::default())
    }
}

/// Sends each worker's timeline back to the coordinator
pub struct CollectTimelineStage;

impl CollectTimelineStage {
    pub const NAME: &'static str = "CollectTimeline";

    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::new(Self::NAME, "Collects the timeline of each worker")
    }
}

#[async_trait]
impl Stage for CollectTimelineStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute_on_worker(&self, ctx: &mut WorkerContext) -> Result<WorkerOutput> {
        Ok(WorkerOutput::ok(AckPayload::Timeline {
            timeline: ctx.timeline.snapshot(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Capabilities, ConnectionSettings as _, Lifecycle as _, MemoryService, MemoryServiceConfig};
    use crate::core::{Category, Event, WorkerConfig};
    use crate::stage::Severity;

    fn context(service: &std::sync::Arc<MemoryService>) -> WorkerContext {
        WorkerContext::new(WorkerConfig::default(), service.capabilities())
    }

    #[tokio::test]
    async fn test_start_and_stop_service() {
        let service = MemoryService::new(MemoryServiceConfig::default());
        let mut ctx = context(&service);

        let output = ServiceStartStage.execute_on_worker(&mut ctx).await.unwrap();
        assert_eq!(output.severity, Severity::Ok);
        assert!(service.is_running());
        assert!(ctx.service().is_some());

        let output = ServiceStartStage.execute_on_worker(&mut ctx).await.unwrap();
        assert_eq!(output.severity, Severity::Warn);

        let output = ServiceStopStage.execute_on_worker(&mut ctx).await.unwrap();
        assert_eq!(output.severity, Severity::Ok);
        assert!(!service.is_running());
        assert!(ctx.service().is_none());

        let output = ServiceStopStage.execute_on_worker(&mut ctx).await.unwrap();
        assert_eq!(output.severity, Severity::Warn);
    }

    #[tokio::test]
    async fn test_start_without_lifecycle_fails() {
        let mut ctx = WorkerContext::new(WorkerConfig::default(), Capabilities::new());
        let result = ServiceStartStage.execute_on_worker(&mut ctx).await;
        assert!(matches!(
            result,
            Err(HarnessError::MissingCapability(Capability::Lifecycle))
        ));
    }

    #[tokio::test]
    async fn test_reconfigure_socket_timeout() {
        let service = MemoryService::new(MemoryServiceConfig::default());
        let mut ctx = context(&service);
        let stage = ReconfigureSocketTimeoutStage::new(ReconfigureSocketTimeoutConfig {
            new_socket_timeout_ms: 1_500,
        });

        let output = stage.execute_on_worker(&mut ctx).await.unwrap();
        assert_eq!(output.severity, Severity::Warn);

        ServiceStartStage.execute_on_worker(&mut ctx).await.unwrap();
        let output = stage.execute_on_worker(&mut ctx).await.unwrap();
        assert_eq!(output.severity, Severity::Ok);
        assert_eq!(service.socket_timeout(), Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_reconfigure_without_connection_settings_is_noop() {
        let service = MemoryService::new(MemoryServiceConfig::default());
        let mut ctx = WorkerContext::new(
            WorkerConfig::default(),
            Capabilities::new().with_lifecycle(service.clone()),
        );
        ServiceStartStage.execute_on_worker(&mut ctx).await.unwrap();

        let stage = ReconfigureSocketTimeoutStage::new(ReconfigureSocketTimeoutConfig {
            new_socket_timeout_ms: 10,
        });
        let output = stage.execute_on_worker(&mut ctx).await.unwrap();
        assert_eq!(output.severity, Severity::Ok);
        assert_eq!(service.socket_timeout(), MemoryServiceConfig::default().socket_timeout);
    }

    #[tokio::test]
    async fn test_collect_timeline() {
        let mut ctx = WorkerContext::new(WorkerConfig::new(2, 3), Capabilities::new());
        ctx.timeline
            .add_event(Category::custom("Stages"), Event::interval(10, "Warmup", 5));

        let output = CollectTimelineStage.execute_on_worker(&mut ctx).await.unwrap();
        match output.payload {
            AckPayload::Timeline { timeline } => {
                assert_eq!(timeline.worker_index, 2);
                assert_eq!(timeline.first_timestamp, Some(10));
                assert_eq!(timeline.last_timestamp, Some(15));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
