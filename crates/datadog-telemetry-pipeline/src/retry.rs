// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Jittered exponential backoff for delivery retries.

use std::time::Duration;

/// Backoff schedule: the base delay doubles per attempt up to a cap, and up
/// to 25% random jitter is added on top to avoid thundering herds. The base
/// doubling dominates the jitter, so delays are strictly increasing until
/// the cap is reached.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Delivery attempts before a batch transitions to dropped.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the base delay.
    pub max_backoff: Duration,
}

impl RetryStrategy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        RetryStrategy {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff);
        let jitter = base.mul_f64(0.25 * rand::random::<f64>());
        base + jitter
    }
}
