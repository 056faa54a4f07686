// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline and endpoint configuration.
//!
//! Batch thresholds, backoff constants, and retry limits are configurable
//! parameters with conservative defaults, not fixed contracts. The endpoint
//! update policy is the one surface carried over verbatim from the original
//! SDK: when the intake endpoint changes, already-buffered events are either
//! discarded or forwarded to the new endpoint.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default ceiling on total buffered bytes before FIFO eviction.
pub(crate) const DEFAULT_MAX_BUFFERED_BYTES: usize = 32 * 1_024 * 1_024;

/// Default maximum uncompressed payload size per batch.
pub(crate) const DEFAULT_MAX_BATCH_BYTES: usize = 5 * 1_024 * 1_024;

/// Default maximum number of events per batch.
pub(crate) const DEFAULT_MAX_BATCH_ENTRIES: usize = 1_000;

/// Default number of records per segment file before rotation.
pub(crate) const DEFAULT_SEGMENT_RECORDS: u64 = 500;

/// Default delivery wake-up interval.
pub(crate) const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Default buffered-bytes threshold that wakes the worker early.
pub(crate) const DEFAULT_FLUSH_THRESHOLD_BYTES: usize = 512 * 1_024;

/// Default per-request network timeout.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum delivery attempts per batch before it is dropped.
pub(crate) const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 3;

/// Default initial retry backoff (doubles each attempt).
pub(crate) const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default backoff cap.
pub(crate) const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default zstd compression level for request bodies.
pub(crate) const DEFAULT_COMPRESSION_LEVEL: i32 = 6;

/// The strategy on how to deal with already-buffered, unsent events when the
/// intake endpoint needs to be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointUpdateStrategy {
    /// All previous unsent events will be deleted and lost forever.
    DiscardOldLogs,
    /// All previous unsent events will be sent to the new endpoint.
    SendOldLogsToNewEndpoint,
}

/// Side effect the pipeline must apply after an endpoint change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointAction {
    /// Purge buffered and in-flight unsent events immediately.
    Purge,
    /// Keep buffered batches, order, and attempt counters; retarget their
    /// next delivery attempt at the new endpoint.
    Retarget,
}

/// Pure decision function mapping an update strategy to the action the
/// pipeline applies through the buffer and worker contracts.
#[must_use]
pub fn on_endpoint_changed(strategy: EndpointUpdateStrategy) -> EndpointAction {
    match strategy {
        EndpointUpdateStrategy::DiscardOldLogs => EndpointAction::Purge,
        EndpointUpdateStrategy::SendOldLogsToNewEndpoint => EndpointAction::Retarget,
    }
}

/// Remote collector destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Intake URL receiving batch POSTs.
    pub url: String,
    /// API key sent in the `DD-API-KEY` header.
    pub api_key: String,
    /// What to do with buffered events when this config replaces another.
    pub update_strategy: EndpointUpdateStrategy,
}

impl EndpointConfig {
    /// Creates an endpoint config with the forward-on-change strategy.
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        EndpointConfig {
            url: url.into(),
            api_key: api_key.into(),
            update_strategy: EndpointUpdateStrategy::SendOldLogsToNewEndpoint,
        }
    }
}

/// Tunable parameters for the buffer, assembler, worker, and transport.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding segment files and the manifest.
    pub storage_dir: PathBuf,
    /// Ceiling on total buffered bytes; oldest events are evicted first when
    /// exceeded.
    pub max_buffered_bytes: usize,
    /// Maximum uncompressed payload size per batch.
    pub max_batch_bytes: usize,
    /// Maximum number of events per batch.
    pub max_batch_entries: usize,
    /// Records per segment file before rotation.
    pub max_segment_records: u64,
    /// Fixed delivery wake-up interval.
    pub flush_interval: Duration,
    /// Buffered-bytes threshold that wakes the worker before the interval.
    pub flush_threshold_bytes: usize,
    /// Per-request network timeout. Mandatory and finite.
    pub request_timeout: Duration,
    /// Maximum delivery attempts per batch before it transitions to dropped.
    pub max_send_attempts: u32,
    /// Initial retry backoff; doubles per attempt.
    pub initial_backoff: Duration,
    /// Cap on the retry backoff.
    pub max_backoff: Duration,
    /// Whether request bodies are zstd-compressed.
    pub use_compression: bool,
    /// zstd compression level when compression is enabled.
    pub compression_level: i32,
}

impl PipelineConfig {
    /// Creates a config with defaults, storing segments under `storage_dir`.
    #[must_use]
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            storage_dir: storage_dir.into(),
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_batch_entries: DEFAULT_MAX_BATCH_ENTRIES,
            max_segment_records: DEFAULT_SEGMENT_RECORDS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD_BYTES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            use_compression: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}
