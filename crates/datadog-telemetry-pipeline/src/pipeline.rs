// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline facade wiring the buffer, assembler, worker, and transport.
//!
//! [`TelemetryPipeline`] is the one surface the host application talks to.
//! Its contract is that no pipeline failure is ever surfaced synchronously:
//! `submit` never blocks on the network and never returns an error. Failures
//! degrade to counters (see [`crate::stats`]) and to registered
//! [`ErrorSink`] callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::BatchAssembler;
use crate::buffer::DurableBuffer;
use crate::config::{on_endpoint_changed, EndpointAction, EndpointConfig, PipelineConfig};
use crate::error::PipelineError;
use crate::event::Event;
use crate::retry::RetryStrategy;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::transport::Transport;
use crate::worker::{DeliveryWorker, DeliveryWorkerConfig};

/// Observer notified of asynchronous pipeline errors (rejected events,
/// dropped batches). Callbacks run on pipeline threads and must not block.
pub trait ErrorSink: Send + Sync {
    fn on_pipeline_error(&self, error: &PipelineError);
}

/// Registered error sinks, shared between the facade and the worker.
#[derive(Default)]
pub(crate) struct SinkRegistry {
    sinks: Mutex<Vec<Box<dyn ErrorSink>>>,
}

#[allow(clippy::expect_used)]
impl SinkRegistry {
    pub(crate) fn register(&self, sink: Box<dyn ErrorSink>) {
        self.sinks.lock().expect("sink lock poisoned").push(sink);
    }

    pub(crate) fn dispatch(&self, error: &PipelineError) {
        for sink in &*self.sinks.lock().expect("sink lock poisoned") {
            sink.on_pipeline_error(error);
        }
    }
}

/// Handle to a running pipeline: durable buffer plus a spawned delivery
/// worker. Dropping the handle without calling [`shutdown`] leaves the
/// worker running until its task is aborted with the runtime.
///
/// [`shutdown`]: TelemetryPipeline::shutdown
pub struct TelemetryPipeline {
    buffer: Arc<DurableBuffer>,
    endpoint: Arc<RwLock<EndpointConfig>>,
    purge_epoch: Arc<AtomicU64>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
    sinks: Arc<SinkRegistry>,
}

#[allow(clippy::expect_used)]
impl TelemetryPipeline {
    /// Opens the durable buffer (recovering any persisted events) and spawns
    /// the delivery worker. Must be called within a tokio runtime.
    pub fn start(
        config: &PipelineConfig,
        endpoint: EndpointConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PipelineError> {
        let stats = Arc::new(PipelineStats::default());
        let buffer = Arc::new(DurableBuffer::open(config, Arc::clone(&stats))?);
        let endpoint = Arc::new(RwLock::new(endpoint));
        let purge_epoch = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let sinks = Arc::new(SinkRegistry::default());

        let worker = DeliveryWorker::new(DeliveryWorkerConfig {
            buffer: Arc::clone(&buffer),
            assembler: BatchAssembler::new(
                Arc::clone(&buffer),
                config.max_batch_bytes,
                config.max_batch_entries,
            ),
            transport,
            endpoint: Arc::clone(&endpoint),
            purge_epoch: Arc::clone(&purge_epoch),
            retry: RetryStrategy::new(
                config.max_send_attempts,
                config.initial_backoff,
                config.max_backoff,
            ),
            flush_interval: config.flush_interval,
            cancel: cancel.clone(),
            stats: Arc::clone(&stats),
            sinks: Arc::clone(&sinks),
        });
        let handle = tokio::spawn(worker.run());
        info!(storage_dir = %config.storage_dir.display(), "telemetry pipeline started");

        Ok(TelemetryPipeline {
            buffer,
            endpoint,
            purge_epoch,
            cancel,
            worker: Some(handle),
            stats,
            sinks,
        })
    }

    /// Durably enqueues an event for delivery. Never returns an error: a
    /// rejected event (oversized, storage failure) increments the rejection
    /// counter and notifies registered error sinks.
    pub fn submit(&self, event: Event) {
        if let Err(e) = self.buffer.append(event) {
            self.stats.incr_rejected();
            debug!(error = %e, "event rejected");
            self.sinks.dispatch(&e);
        }
    }

    /// Replaces the intake endpoint. The new config's update strategy
    /// decides the fate of already-buffered events: discard purges them
    /// (including an in-flight batch), forward retargets them at the new
    /// endpoint with order and attempt counters intact.
    pub fn set_endpoint(&self, new_endpoint: EndpointConfig) {
        let action = on_endpoint_changed(new_endpoint.update_strategy);
        info!(url = %new_endpoint.url, ?action, "endpoint updated");
        {
            let mut endpoint = self.endpoint.write().expect("endpoint lock poisoned");
            *endpoint = new_endpoint;
        }
        match action {
            EndpointAction::Purge => {
                // Bump the epoch first so the worker abandons its in-flight
                // batch instead of requeueing it after the purge.
                self.purge_epoch.fetch_add(1, Ordering::AcqRel);
                self.buffer.purge();
            }
            EndpointAction::Retarget => {}
        }
    }

    /// Registers an observer for asynchronous pipeline errors.
    pub fn register_error_sink(&self, sink: Box<dyn ErrorSink>) {
        self.sinks.register(sink);
    }

    /// Point-in-time copy of the diagnostics counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of buffered events not currently in flight.
    #[must_use]
    pub fn buffered_events(&self) -> usize {
        self.buffer.pending_len()
    }

    /// Stops the delivery worker after one final best-effort flush and waits
    /// for it to exit. Events still buffered afterwards are delivered on the
    /// next start from the same storage directory.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.take() {
            if let Err(e) = handle.await {
                debug!(error = %e, "delivery worker task failed");
            }
        }
        info!("telemetry pipeline stopped");
    }
}
