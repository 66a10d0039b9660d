//! HTTP cluster integration tests
//!
//! These tests spin up real worker HTTP servers and drive them with the
//! coordinator over HTTP/TCP connections.

use std::collections::BTreeSet;

use loadstage::adapter::WeakCounterOperations as _;
use loadstage::stage::{AckPayload, Scenario, Severity, StageSpec};
use loadstage::testing::TestCluster;
use loadstage::transport::{TransportError, WorkerTransport};

/// Test a full scenario over HTTP.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_http_scenario() {
    let cluster = TestCluster::with_http(3).await;
    let coordinator = cluster.http_coordinator();

    let scenario = Scenario::new(vec![
        StageSpec::new("ServiceStart"),
        StageSpec::new("StrongCounterTest")
            .with_property("counter_name", "http")
            .with_property("operation", "AddAndGet")
            .with_property("delta", 5)
            .with_property("num_threads_per_worker", 2)
            .with_property("ops_per_thread", 20),
        StageSpec::new("WeakCounterTest")
            .with_property("counter_name", "http-weak")
            .with_property("num_threads_per_worker", 2)
            .with_property("ops_per_thread", 50),
        StageSpec::new("ServiceStop"),
    ]);
    let report = coordinator.run(&scenario).await.unwrap();
    assert_eq!(report.severity(), Severity::Ok, "{:?}", report.stages);
    assert_eq!(report.stages.len(), 4);

    let mut values = BTreeSet::new();
    for ack in &report.stages[1].acks {
        if let AckPayload::CounterValues { sequences, .. } = &ack.payload {
            for sequence in sequences {
                values.extend(sequence.values.iter().copied());
            }
        }
    }
    assert_eq!(values, (1..=120).map(|i| i * 5).collect::<BTreeSet<i64>>());

    cluster.start_service().await;
    let weak = cluster.service.weak_counter("http-weak").unwrap();
    assert_eq!(weak.get_value().await.unwrap(), 300);

    assert_eq!(report.timelines.len(), 3);

    cluster.shutdown().await;
}

/// Test worker status and stop requests over HTTP.
#[tokio::test]
async fn test_http_status_and_stop() {
    let cluster = TestCluster::with_http(2).await;
    let coordinator = cluster.http_coordinator();
    let transport = coordinator.transport();

    assert_eq!(transport.workers(), vec![0, 1]);
    for worker in transport.workers() {
        let status = transport.status(worker).await.unwrap();
        assert_eq!(status.worker_index, worker);
        assert_eq!(status.worker_count, 2);
        assert_eq!(status.current_stage, None);
        transport.stop_stressors(worker).await.unwrap();
    }

    assert_eq!(
        transport.status(7).await.unwrap_err(),
        TransportError::WorkerNotFound(7)
    );

    cluster.shutdown().await;
}

/// Test that an unreachable worker yields an error acknowledgement.
#[tokio::test]
async fn test_http_unreachable_worker_halts_run() {
    let cluster = TestCluster::with_http(2).await;
    let coordinator = cluster.http_coordinator();
    cluster.shutdown().await;

    let report = coordinator
        .run(&Scenario::new(vec![StageSpec::new("ServiceStart")]))
        .await
        .unwrap();

    assert_eq!(report.aborted_at, Some(0));
    assert_eq!(report.stages[0].severity, Severity::Error);
    assert!(report.stages[0]
        .messages
        .iter()
        .all(|m| m.contains("transport error")));
}
