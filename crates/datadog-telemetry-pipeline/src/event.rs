// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Immutable telemetry event model.
//!
//! An [`Event`] is created once by a producer and never mutated afterwards;
//! the buffer owns it from append until deletion. Events carry a hybrid
//! timestamp (wall clock plus a process-wide monotonic sequence) so that
//! events produced within the same millisecond still have a stable order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-wide monotonic sequence for timestamp tie-breaking.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Category of a telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Application log entry.
    Log,
    /// Trace span.
    Span,
    /// RUM user action (tap, click, scroll).
    RumAction,
    /// RUM view (screen / page) event.
    RumView,
    /// RUM resource (network request) event.
    RumResource,
    /// RUM error event.
    RumError,
}

/// Hybrid wall + monotonic timestamp.
///
/// `wall_ms` is the unix epoch time in milliseconds when the event was
/// created; `seq` is a process-wide counter that breaks ties between events
/// created within the same millisecond. Ordering compares `wall_ms` first,
/// then `seq`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Milliseconds since the unix epoch.
    pub wall_ms: u64,
    /// Monotonic creation sequence within this process.
    pub seq: u64,
}

impl Timestamp {
    /// Captures the current time and the next monotonic sequence number.
    #[must_use]
    pub fn now() -> Self {
        let wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Timestamp {
            wall_ms,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// A single immutable telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// Event category.
    pub kind: EventKind,
    /// Creation timestamp.
    pub timestamp: Timestamp,
    /// Ordered key/value attributes; insertion order is preserved on
    /// serialization.
    pub attributes: Vec<(String, String)>,
    /// Serialized size of the event in bytes, computed at creation and used
    /// for buffer accounting and batch packing.
    pub size_bytes: usize,
}

impl Event {
    /// Creates a new event, capturing the current timestamp and computing
    /// the serialized size.
    #[must_use]
    pub fn new(kind: EventKind, attributes: Vec<(String, String)>) -> Self {
        let mut event = Event {
            id: Uuid::new_v4(),
            kind,
            timestamp: Timestamp::now(),
            attributes,
            size_bytes: 0,
        };
        // Serialization of this type cannot fail; fall back to 0 rather
        // than surfacing an error to the producer.
        event.size_bytes = serde_json::to_vec(&event).map_or(0, |v| v.len());
        event
    }

    /// Overrides the accounted size, for tests that need exact byte counts.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_size_bytes(mut self, size_bytes: usize) -> Self {
        self.size_bytes = size_bytes;
        self
    }
}
