// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Internal diagnostics counters.
//!
//! Data loss inside the pipeline is silent by design but always observable:
//! every drop path increments a counter here instead of raising an error to
//! the host application.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters for pipeline diagnostics.
#[derive(Debug, Default)]
pub struct PipelineStats {
    events_appended: AtomicU64,
    events_dropped_overflow: AtomicU64,
    events_dropped_delivery: AtomicU64,
    events_rejected: AtomicU64,
    batches_delivered: AtomicU64,
    batches_dropped: AtomicU64,
    records_corrupted: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn incr_appended(&self) {
        self.events_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_dropped_overflow(&self, count: u64) {
        self.events_dropped_overflow.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn incr_dropped_delivery(&self, count: u64) {
        self.events_dropped_delivery.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn incr_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_batches_delivered(&self) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_batches_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_records_corrupted(&self, count: u64) {
        self.records_corrupted.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_appended: self.events_appended.load(Ordering::Relaxed),
            events_dropped_overflow: self.events_dropped_overflow.load(Ordering::Relaxed),
            events_dropped_delivery: self.events_dropped_delivery.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            records_corrupted: self.records_corrupted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Events durably appended to the buffer.
    pub events_appended: u64,
    /// Events evicted by the FIFO overflow policy.
    pub events_dropped_overflow: u64,
    /// Events discarded after delivery gave up (retries exhausted or fatal
    /// response).
    pub events_dropped_delivery: u64,
    /// Events rejected at append time (single event larger than the buffer
    /// ceiling or storage failure).
    pub events_rejected: u64,
    /// Batches acknowledged by the intake.
    pub batches_delivered: u64,
    /// Batches that transitioned to dropped.
    pub batches_dropped: u64,
    /// Persisted records skipped due to checksum or parse failure.
    pub records_corrupted: u64,
}
