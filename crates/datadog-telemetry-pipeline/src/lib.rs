// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Datadog Telemetry Pipeline
//!
//! Durable batching and delivery pipeline for client-side telemetry events
//! (logs, trace spans, RUM events). The pipeline sits between instrumentation
//! call sites and the remote intake: producers submit events, the pipeline
//! persists them locally, groups them into bounded batches, and ships them
//! sequentially with retry, backoff, and crash recovery.
//!
//! ## Architecture
//!
//! ```text
//!   Producers (log / trace / RUM call sites)
//!       │ submit(event)
//!       v
//!   ┌────────────────┐
//!   │ DurableBuffer  │ (checksummed segment files + manifest)
//!   └───────┬────────┘
//!           │ drain_ready_batch
//!           v
//!   ┌────────────────┐
//!   │ BatchAssembler │ (size/count bounded, FIFO)
//!   └───────┬────────┘
//!           │
//!           v
//!   ┌────────────────┐
//!   │ DeliveryWorker │ (one batch in flight, backoff, cancellation)
//!   └───────┬────────┘
//!           │ Transport::send
//!           v
//!      Remote intake
//! ```
//!
//! ## Guarantees
//!
//! - Append order is preserved end to end: draining batches in order and
//!   concatenating their events reproduces the original submission order.
//! - An append acknowledged to the producer survives a process restart.
//! - At-least-once delivery: an un-acked in-flight batch is requeued after a
//!   crash and may be resent; the receiver is expected to be idempotent.
//! - No failure in this subsystem is ever surfaced synchronously to the host
//!   application; everything degrades to counters and error-sink callbacks.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_assignments)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Batch type and the assembler that packs buffered events into batches.
pub mod batch;

/// Durable on-disk event buffer with crash recovery.
pub mod buffer;

/// Pipeline and endpoint configuration, including the endpoint update policy.
pub mod config;

/// Error taxonomy for the pipeline.
pub mod error;

/// Immutable telemetry event model.
pub mod event;

/// Pipeline facade wiring producers, buffer, worker, and transport together.
pub mod pipeline;

/// Jittered exponential backoff strategy for delivery retries.
pub mod retry;

/// Internal diagnostics counters.
pub mod stats;

/// Transport abstraction and the HTTP implementation.
pub mod transport;

/// Background delivery worker.
pub mod worker;

pub use batch::{Batch, BatchAssembler};
pub use buffer::DurableBuffer;
pub use config::{EndpointAction, EndpointConfig, EndpointUpdateStrategy, PipelineConfig};
pub use error::PipelineError;
pub use event::{Event, EventKind, Timestamp};
pub use pipeline::{ErrorSink, TelemetryPipeline};
pub use stats::{PipelineStats, StatsSnapshot};
pub use transport::{HttpTransport, SendOutcome, Transport};
