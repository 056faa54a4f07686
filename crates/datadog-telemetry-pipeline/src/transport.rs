// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transport abstraction and the HTTP implementation.
//!
//! The delivery worker is written against the [`Transport`] trait so tests
//! can script outcomes without a network. [`HttpTransport`] POSTs batches as
//! JSON arrays with optional zstd compression and a mandatory finite
//! timeout, and classifies responses into the retry taxonomy: 2xx is
//! success, 429 and 5xx (and connectivity errors) are retryable, any other
//! 4xx is fatal.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::config::{EndpointConfig, PipelineConfig};

/// Result of one transmission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The intake acknowledged the batch.
    Success,
    /// Transient failure (timeout, 5xx, rate limit, connectivity loss);
    /// worth retrying with backoff.
    Retryable(String),
    /// Non-retryable failure; the batch must be dropped.
    Fatal(String),
}

/// External collaborator delivering batches to a remote collector.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one batch to the given endpoint.
    async fn send(&self, endpoint: &EndpointConfig, batch: &Batch) -> SendOutcome;
}

/// HTTP transport POSTing JSON batch payloads to the intake.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
    use_compression: bool,
    compression_level: i32,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
            timeout: config.request_timeout,
            use_compression: config.use_compression,
            compression_level: config.compression_level,
        }
    }

    /// Compresses the payload, falling back to the uncompressed body when
    /// encoding fails. Returns the body and whether it is compressed.
    fn compress(&self, data: Vec<u8>) -> (Vec<u8>, bool) {
        if !self.use_compression {
            return (data, false);
        }
        match Self::encode(&data, self.compression_level) {
            Ok(compressed) => (compressed, true),
            Err(e) => {
                debug!(error = %e, "failed to compress payload, sending uncompressed");
                (data, false)
            }
        }
    }

    fn encode(data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
        let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), level)?;
        encoder.write_all(data)?;
        encoder.finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &EndpointConfig, batch: &Batch) -> SendOutcome {
        let body = match serde_json::to_vec(&batch.events) {
            Ok(body) => body,
            Err(e) => {
                // A batch that cannot be serialized will never succeed.
                return SendOutcome::Fatal(format!("failed to serialize batch: {e}"));
            }
        };
        let (body, compressed) = self.compress(body);

        let mut request = self
            .client
            .post(&endpoint.url)
            .timeout(self.timeout)
            .header("DD-API-KEY", &endpoint.api_key)
            .header("Content-Type", "application/json");
        if compressed {
            request = request.header("Content-Encoding", "zstd");
        }

        match request.body(body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    SendOutcome::Success
                } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    SendOutcome::Retryable(format!("intake returned {status}"))
                } else {
                    warn!(%status, "intake rejected batch");
                    SendOutcome::Fatal(format!("intake returned {status}"))
                }
            }
            // Timeouts and connectivity failures are transient by definition.
            Err(e) => SendOutcome::Retryable(e.to_string()),
        }
    }
}
