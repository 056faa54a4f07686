// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mockito::Server;

use datadog_telemetry_pipeline::{
    Batch, EndpointConfig, EndpointUpdateStrategy, Event, EventKind, HttpTransport,
    PipelineConfig, SendOutcome, TelemetryPipeline, Transport,
};

fn log_event(message: &str) -> Event {
    Event::new(
        EventKind::Log,
        vec![("message".to_string(), message.to_string())],
    )
}

/// Config that never flushes on its own, so tests drive delivery through
/// shutdown and endpoint changes deterministically.
fn manual_flush_config(dir: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(dir);
    config.flush_interval = Duration::from_secs(3_600);
    config.flush_threshold_bytes = usize::MAX;
    config.use_compression = false;
    config.request_timeout = Duration::from_secs(2);
    config
}

/// Transport simulating a network that is down: every attempt is transient.
struct OfflineTransport;

#[async_trait]
impl Transport for OfflineTransport {
    async fn send(&self, _endpoint: &EndpointConfig, _batch: &Batch) -> SendOutcome {
        SendOutcome::Retryable("connection refused".to_string())
    }
}

/// Transport recording delivered messages per endpoint URL.
#[derive(Default)]
struct RecordingTransport {
    sends: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingTransport {
    fn sends(&self) -> Vec<(String, Vec<String>)> {
        self.sends.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, endpoint: &EndpointConfig, batch: &Batch) -> SendOutcome {
        let messages = batch
            .events
            .iter()
            .map(|e| e.attributes[0].1.clone())
            .collect();
        self.sends
            .lock()
            .expect("lock")
            .push((endpoint.url.clone(), messages));
        SendOutcome::Success
    }
}

#[tokio::test]
async fn pipeline_ships_batches_to_http_intake() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("DD-API-KEY", "mock-api-key")
        .match_header("Content-Type", "application/json")
        .with_status(202)
        .create_async()
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let config = manual_flush_config(dir.path());
    let transport = Arc::new(HttpTransport::new(&config));

    let pipeline = TelemetryPipeline::start(
        &config,
        EndpointConfig::new(server.url(), "mock-api-key"),
        transport,
    )
    .expect("start pipeline");

    for i in 0..5 {
        pipeline.submit(log_event(&format!("event-{i}")));
    }
    pipeline.shutdown().await;

    mock.assert_async().await;
}

#[tokio::test]
async fn unsent_events_survive_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = manual_flush_config(dir.path());

    // First run: the network is down, nothing gets out.
    {
        let pipeline = TelemetryPipeline::start(
            &config,
            EndpointConfig::new("https://intake.example.com", "key"),
            Arc::new(OfflineTransport),
        )
        .expect("start pipeline");
        for name in ["A", "B", "C"] {
            pipeline.submit(log_event(name));
        }
        pipeline.shutdown().await;
    }

    // Second run from the same directory: everything is recovered and
    // delivered in the original order.
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = TelemetryPipeline::start(
        &config,
        EndpointConfig::new("https://intake.example.com", "key"),
        Arc::clone(&transport) as Arc<dyn Transport>,
    )
    .expect("restart pipeline");
    assert_eq!(pipeline.buffered_events(), 3);
    pipeline.shutdown().await;

    let sends = transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].1, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn acknowledged_events_are_not_redelivered_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = manual_flush_config(dir.path());

    {
        let transport = Arc::new(RecordingTransport::default());
        let pipeline = TelemetryPipeline::start(
            &config,
            EndpointConfig::new("https://intake.example.com", "key"),
            Arc::clone(&transport) as Arc<dyn Transport>,
        )
        .expect("start pipeline");
        for name in ["A", "B"] {
            pipeline.submit(log_event(name));
        }
        pipeline.shutdown().await;
        assert_eq!(transport.sends().len(), 1);
    }

    let transport = Arc::new(RecordingTransport::default());
    let pipeline = TelemetryPipeline::start(
        &config,
        EndpointConfig::new("https://intake.example.com", "key"),
        Arc::clone(&transport) as Arc<dyn Transport>,
    )
    .expect("restart pipeline");
    assert_eq!(pipeline.buffered_events(), 0);
    pipeline.shutdown().await;
    assert!(transport.sends().is_empty());
}

#[tokio::test]
async fn endpoint_change_forwards_buffered_events_to_new_intake() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = manual_flush_config(dir.path());
    let transport = Arc::new(RecordingTransport::default());

    let pipeline = TelemetryPipeline::start(
        &config,
        EndpointConfig::new("https://old.example.com", "key"),
        Arc::clone(&transport) as Arc<dyn Transport>,
    )
    .expect("start pipeline");

    for name in ["A", "B"] {
        pipeline.submit(log_event(name));
    }
    pipeline.set_endpoint(EndpointConfig::new("https://new.example.com", "key"));
    pipeline.shutdown().await;

    let sends = transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].0, "https://new.example.com");
    assert_eq!(sends[0].1, vec!["A", "B"]);
}

#[tokio::test]
async fn endpoint_change_discard_drops_buffered_events() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = manual_flush_config(dir.path());
    let transport = Arc::new(RecordingTransport::default());

    let pipeline = TelemetryPipeline::start(
        &config,
        EndpointConfig::new("https://old.example.com", "key"),
        Arc::clone(&transport) as Arc<dyn Transport>,
    )
    .expect("start pipeline");

    for name in ["A", "B", "C"] {
        pipeline.submit(log_event(name));
    }
    let mut new_endpoint = EndpointConfig::new("https://new.example.com", "key");
    new_endpoint.update_strategy = EndpointUpdateStrategy::DiscardOldLogs;
    pipeline.set_endpoint(new_endpoint);

    // Events submitted after the change still flow to the new endpoint.
    pipeline.submit(log_event("D"));
    pipeline.shutdown().await;

    let sends = transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].0, "https://new.example.com");
    assert_eq!(sends[0].1, vec!["D"]);
}
