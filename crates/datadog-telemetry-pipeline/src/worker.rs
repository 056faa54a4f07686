// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background delivery worker.
//!
//! The worker drains ready batches and ships them sequentially: exactly one
//! batch per destination is in flight at a time, which bounds memory and
//! preserves event ordering. Each batch walks the state machine
//! `Pending -> Sending -> {Acked, Retry, Dropped}`:
//!
//! - `Acked`: the intake accepted the batch; its buffer entries are removed.
//! - `Retry`: a transient failure; the worker backs off with jittered
//!   exponential delays and tries again, up to the attempt cap.
//! - `Dropped`: retries exhausted or a fatal response; the events are
//!   discarded exactly once and the loss counters increment.
//!
//! The worker wakes on a fixed flush interval, on the buffer's
//! size-threshold notification, or on cancellation. On cancellation it
//! performs one final best-effort flush and exits, leaving the buffer in its
//! last fully-durable state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::batch::{Batch, BatchAssembler};
use crate::buffer::DurableBuffer;
use crate::config::EndpointConfig;
use crate::error::PipelineError;
use crate::pipeline::SinkRegistry;
use crate::retry::RetryStrategy;
use crate::stats::PipelineStats;
use crate::transport::{SendOutcome, Transport};

/// Terminal outcome of one batch's delivery attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryOutcome {
    /// Acknowledged by the intake and removed from the buffer.
    Acked,
    /// Discarded after exhausted retries or a fatal response.
    Dropped,
    /// Requeued into the buffer because the worker is shutting down.
    Requeued,
    /// Abandoned because the buffer was purged while the batch was in
    /// flight (endpoint change with the discard strategy).
    Abandoned,
}

/// Collaborators and tunables for the delivery worker.
pub(crate) struct DeliveryWorkerConfig {
    pub(crate) buffer: Arc<DurableBuffer>,
    pub(crate) assembler: BatchAssembler,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) endpoint: Arc<RwLock<EndpointConfig>>,
    pub(crate) purge_epoch: Arc<AtomicU64>,
    pub(crate) retry: RetryStrategy,
    pub(crate) flush_interval: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) sinks: Arc<SinkRegistry>,
}

/// Sequential background task draining and delivering batches.
pub(crate) struct DeliveryWorker {
    buffer: Arc<DurableBuffer>,
    assembler: BatchAssembler,
    transport: Arc<dyn Transport>,
    endpoint: Arc<RwLock<EndpointConfig>>,
    purge_epoch: Arc<AtomicU64>,
    retry: RetryStrategy,
    flush_interval: Duration,
    cancel: CancellationToken,
    stats: Arc<PipelineStats>,
    sinks: Arc<SinkRegistry>,
}

#[allow(clippy::expect_used)]
impl DeliveryWorker {
    pub(crate) fn new(config: DeliveryWorkerConfig) -> Self {
        DeliveryWorker {
            buffer: config.buffer,
            assembler: config.assembler,
            transport: config.transport,
            endpoint: config.endpoint,
            purge_epoch: config.purge_epoch,
            retry: config.retry,
            flush_interval: config.flush_interval,
            cancel: config.cancel,
            stats: config.stats,
            sinks: config.sinks,
        }
    }

    /// Runs the delivery loop until cancellation.
    pub(crate) async fn run(self) {
        debug!("delivery worker started");
        let notify = self.buffer.notifier();
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.flush_interval) => {}
                () = notify.notified() => {}
                () = self.cancel.cancelled() => {
                    debug!("delivery worker received shutdown signal, flushing ready batches");
                    self.flush_ready().await;
                    break;
                }
            }
            self.flush_ready().await;
        }
        debug!("delivery worker stopped");
    }

    /// Assembles and delivers batches until the buffer has nothing ready or
    /// shutdown interrupts a retry wait.
    async fn flush_ready(&self) {
        loop {
            // Captured before assembly: a purge that lands between assembly
            // and the first attempt must still abandon the batch.
            let epoch = self.purge_epoch.load(Ordering::Acquire);
            let Some(batch) = self.assembler.try_assemble() else {
                break;
            };
            if self.deliver(batch, epoch).await == DeliveryOutcome::Requeued {
                break;
            }
        }
    }

    /// Drives one batch through `Sending -> {Acked, Retry, Dropped}`.
    /// `epoch` is the purge epoch observed before the batch was assembled.
    async fn deliver(&self, mut batch: Batch, epoch: u64) -> DeliveryOutcome {
        loop {
            if self.purge_epoch.load(Ordering::Acquire) != epoch {
                debug!(batch_id = %batch.id, "buffer purged while batch was in flight, abandoning");
                return DeliveryOutcome::Abandoned;
            }

            batch.attempt_count += 1;
            let endpoint = self
                .endpoint
                .read()
                .expect("endpoint lock poisoned")
                .clone();
            debug!(
                batch_id = %batch.id,
                attempt = batch.attempt_count,
                events = batch.events.len(),
                "sending batch"
            );

            match self.transport.send(&endpoint, &batch).await {
                SendOutcome::Success => {
                    self.buffer.remove_batch(batch.id);
                    self.stats.incr_batches_delivered();
                    return DeliveryOutcome::Acked;
                }
                SendOutcome::Fatal(reason) => {
                    warn!(batch_id = %batch.id, %reason, "fatal delivery failure, dropping batch");
                    self.drop_batch(&batch, PipelineError::FatalSendFailure(reason));
                    return DeliveryOutcome::Dropped;
                }
                SendOutcome::Retryable(reason) => {
                    if batch.attempt_count >= self.retry.max_attempts {
                        warn!(
                            batch_id = %batch.id,
                            attempts = batch.attempt_count,
                            %reason,
                            "retries exhausted, dropping batch"
                        );
                        self.drop_batch(&batch, PipelineError::TransientSendFailure(reason));
                        return DeliveryOutcome::Dropped;
                    }
                    let delay = self.retry.delay(batch.attempt_count);
                    debug!(batch_id = %batch.id, ?delay, %reason, "transient delivery failure, backing off");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.cancel.cancelled() => {
                            self.buffer.requeue_batch(batch);
                            return DeliveryOutcome::Requeued;
                        }
                    }
                }
            }
        }
    }

    fn drop_batch(&self, batch: &Batch, error: PipelineError) {
        self.buffer.remove_batch(batch.id);
        self.stats.incr_batches_dropped();
        self.stats
            .incr_dropped_delivery(u64::try_from(batch.events.len()).unwrap_or(u64::MAX));
        self.sinks.dispatch(&error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::event::{Event, EventKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Transport that replays a script of outcomes and records when each
    /// send happened (tokio clock, so paused-time tests are deterministic).
    struct ScriptedTransport {
        script: Mutex<VecDeque<SendOutcome>>,
        sends: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                script: Mutex::new(script.into()),
                sends: Mutex::new(Vec::new()),
            })
        }

        fn send_times(&self) -> Vec<Instant> {
            self.sends.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _endpoint: &EndpointConfig, _batch: &Batch) -> SendOutcome {
            self.sends.lock().expect("lock").push(Instant::now());
            self.script
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(SendOutcome::Success)
        }
    }

    struct Harness {
        buffer: Arc<DurableBuffer>,
        stats: Arc<PipelineStats>,
        purge_epoch: Arc<AtomicU64>,
        cancel: CancellationToken,
        _dir: tempfile::TempDir,
    }

    fn build_worker(transport: Arc<dyn Transport>) -> (DeliveryWorker, Harness) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig::new(dir.path());
        let stats = Arc::new(PipelineStats::default());
        let buffer =
            Arc::new(DurableBuffer::open(&config, Arc::clone(&stats)).expect("open buffer"));
        let purge_epoch = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let worker = DeliveryWorker::new(DeliveryWorkerConfig {
            buffer: Arc::clone(&buffer),
            assembler: BatchAssembler::new(Arc::clone(&buffer), 1_000, 100),
            transport,
            endpoint: Arc::new(RwLock::new(EndpointConfig::new(
                "https://intake.example.com",
                "test-key",
            ))),
            purge_epoch: Arc::clone(&purge_epoch),
            retry: RetryStrategy::new(3, Duration::from_millis(100), Duration::from_secs(10)),
            flush_interval: Duration::from_secs(5),
            cancel: cancel.clone(),
            stats: Arc::clone(&stats),
            sinks: Arc::new(SinkRegistry::default()),
        });

        (
            worker,
            Harness {
                buffer,
                stats,
                purge_epoch,
                cancel,
                _dir: dir,
            },
        )
    }

    fn append_events(buffer: &DurableBuffer, count: usize) {
        for i in 0..count {
            let event = Event::new(
                EventKind::Log,
                vec![("message".to_string(), format!("e{i}"))],
            );
            buffer.append(event).expect("append");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_delivery_removes_events() {
        let transport = ScriptedTransport::new(vec![SendOutcome::Success]);
        let (worker, harness) = build_worker(transport.clone());
        append_events(&harness.buffer, 3);

        worker.flush_ready().await;

        assert_eq!(harness.buffer.pending_len(), 0);
        let snapshot = harness.stats.snapshot();
        assert_eq!(snapshot.batches_delivered, 1);
        assert_eq!(snapshot.batches_dropped, 0);
        assert_eq!(transport.send_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failures_back_off_then_succeed() {
        let transport = ScriptedTransport::new(vec![
            SendOutcome::Retryable("503".to_string()),
            SendOutcome::Retryable("503".to_string()),
            SendOutcome::Success,
        ]);
        let (worker, harness) = build_worker(transport.clone());
        append_events(&harness.buffer, 2);

        worker.flush_ready().await;

        let times = transport.send_times();
        assert_eq!(times.len(), 3);
        // Delays between attempts must be strictly increasing.
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_millis(100));
        assert!(second_gap > first_gap);

        assert_eq!(harness.stats.snapshot().batches_delivered, 1);
        assert_eq!(harness.buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_drops_batch_exactly_once() {
        let transport = ScriptedTransport::new(vec![
            SendOutcome::Retryable("timeout".to_string()),
            SendOutcome::Retryable("timeout".to_string()),
            SendOutcome::Retryable("timeout".to_string()),
        ]);
        let (worker, harness) = build_worker(transport.clone());
        append_events(&harness.buffer, 4);

        worker.flush_ready().await;

        // max_attempts is 3: exactly three sends, then dropped.
        assert_eq!(transport.send_times().len(), 3);
        let snapshot = harness.stats.snapshot();
        assert_eq!(snapshot.batches_dropped, 1);
        assert_eq!(snapshot.events_dropped_delivery, 4);
        assert_eq!(snapshot.batches_delivered, 0);
        // The dropped events are gone from the buffer.
        assert_eq!(harness.buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_drops_immediately() {
        let transport = ScriptedTransport::new(vec![SendOutcome::Fatal("400".to_string())]);
        let (worker, harness) = build_worker(transport.clone());
        append_events(&harness.buffer, 2);

        worker.flush_ready().await;

        assert_eq!(transport.send_times().len(), 1);
        let snapshot = harness.stats.snapshot();
        assert_eq!(snapshot.batches_dropped, 1);
        assert_eq!(snapshot.events_dropped_delivery, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_requeues() {
        let transport =
            ScriptedTransport::new(vec![SendOutcome::Retryable("offline".to_string())]);
        let (worker, harness) = build_worker(transport.clone());
        append_events(&harness.buffer, 3);

        // Cancel before the flush: the single attempt fails, and the backoff
        // wait observes the cancellation immediately.
        harness.cancel.cancel();
        worker.flush_ready().await;

        assert_eq!(transport.send_times().len(), 1);
        assert_eq!(harness.buffer.pending_len(), 3);
        assert_eq!(harness.stats.snapshot().batches_dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_epoch_abandons_in_flight_batch() {
        let transport =
            ScriptedTransport::new(vec![SendOutcome::Retryable("offline".to_string())]);
        let (worker, harness) = build_worker(transport.clone());
        append_events(&harness.buffer, 2);

        let epoch = harness.purge_epoch.load(Ordering::Acquire);
        let batch = worker.assembler.try_assemble().expect("batch");

        // Endpoint changes with the discard strategy while the batch is
        // backing off after its first failed attempt.
        let buffer = Arc::clone(&harness.buffer);
        let purge_epoch = Arc::clone(&harness.purge_epoch);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            purge_epoch.fetch_add(1, Ordering::AcqRel);
            buffer.purge();
        });

        let outcome = worker.deliver(batch, epoch).await;
        assert_eq!(outcome, DeliveryOutcome::Abandoned);
        // One attempt was made before the purge; none after.
        assert_eq!(transport.send_times().len(), 1);
        assert_eq!(harness.buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_between_assembly_and_send_abandons_batch() {
        let transport = ScriptedTransport::new(vec![]);
        let (worker, harness) = build_worker(transport.clone());
        append_events(&harness.buffer, 2);

        let epoch = harness.purge_epoch.load(Ordering::Acquire);
        let batch = worker.assembler.try_assemble().expect("batch");

        // The purge lands after the batch was assembled but before the
        // first attempt; nothing may reach the new endpoint.
        harness.purge_epoch.fetch_add(1, Ordering::AcqRel);
        harness.buffer.purge();

        let outcome = worker.deliver(batch, epoch).await;
        assert_eq!(outcome, DeliveryOutcome::Abandoned);
        assert_eq!(transport.send_times().len(), 0);
        assert_eq!(harness.buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_on_interval_and_shuts_down() {
        let transport = ScriptedTransport::new(vec![]);
        let (worker, harness) = build_worker(transport.clone());
        append_events(&harness.buffer, 1);

        let cancel = harness.cancel.clone();
        let handle = tokio::spawn(worker.run());

        // Let at least one flush interval elapse.
        tokio::time::sleep(Duration::from_secs(6)).await;
        cancel.cancel();
        handle.await.expect("worker task");

        assert_eq!(harness.stats.snapshot().batches_delivered, 1);
        assert_eq!(harness.buffer.pending_len(), 0);
    }
}
