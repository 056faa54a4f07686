// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the pipeline.
//!
//! None of these errors ever reach the host application synchronously. They
//! are consumed internally, counted in [`crate::stats::PipelineStats`], and
//! forwarded to registered error sinks for diagnostics.

/// Errors that can occur inside the telemetry pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Local capacity exceeded and the incoming event could not be admitted
    /// even after evicting older events.
    #[error("buffer capacity exceeded, event rejected")]
    BufferFull,

    /// A delivery attempt failed for a reason worth retrying (timeout, 5xx,
    /// rate limit, connectivity loss).
    #[error("transient delivery failure: {0}")]
    TransientSendFailure(String),

    /// A delivery attempt failed permanently (4xx other than rate limit);
    /// the batch was dropped.
    #[error("fatal delivery failure: {0}")]
    FatalSendFailure(String),

    /// A persisted record failed its checksum or could not be parsed. The
    /// record is skipped, never crashing the host.
    #[error("corrupt persisted record in {segment}: {reason}")]
    CorruptedSegment {
        /// File name of the segment holding the corrupt record.
        segment: String,
        /// Parse or checksum failure description.
        reason: String,
    },

    /// Underlying storage failure while reading or writing segments.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Event or manifest (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
