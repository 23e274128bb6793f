// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry logic for vendor API calls with exponential backoff
//!
//! Two schedules are used: a short one for network blips and 5xx
//! responses, and a much longer one for 429 responses.

use crate::config::settings::ResilienceConfig;
use crate::error::{NokodeError, Result, RetryClass};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for outbound vendor calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed for 429 and 5xx responses
    pub max_retries: u32,
    /// Retries allowed for transport failures
    pub network_max_retries: u32,
    /// First delay of the generic schedule
    pub base_delay: Duration,
    /// Cap of the generic schedule
    pub max_delay: Duration,
    /// First delay of the rate-limit schedule
    pub rate_limit_base_delay: Duration,
    /// Growth factor of the rate-limit schedule
    pub rate_limit_multiplier: u32,
    /// Jitter percentage (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            network_max_retries: config.network_max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            rate_limit_base_delay: Duration::from_millis(config.rate_limit_base_delay_ms),
            rate_limit_multiplier: config.rate_limit_multiplier.max(1),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            network_max_retries: 0,
            ..Self::default()
        }
    }

    /// Generic delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn generic_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Rate-limit delay before retry number `attempt` (1-based): base * multiplier^(attempt-1).
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = self.rate_limit_multiplier.saturating_pow(exponent);
        self.rate_limit_base_delay.saturating_mul(factor)
    }

    /// How many retries the given failure class allows
    pub fn retries_for(&self, class: RetryClass) -> u32 {
        match class {
            RetryClass::RateLimited { .. } | RetryClass::Server => self.max_retries,
            RetryClass::Network => self.network_max_retries.min(self.max_retries),
            RetryClass::Permanent => 0,
        }
    }

    /// Delay before retry number `attempt` after a failure of the given class
    pub fn delay_for(&self, attempt: u32, class: RetryClass) -> Duration {
        let delay = match class {
            RetryClass::RateLimited { retry_after } => {
                let scheduled = self.rate_limit_delay(attempt);
                retry_after.map_or(scheduled, |hint| hint.max(scheduled))
            }
            RetryClass::Server | RetryClass::Network => self.generic_delay(attempt),
            RetryClass::Permanent => Duration::ZERO,
        };
        self.apply_jitter(delay)
    }

    /// The full sequence of delays a run of `retries` same-class failures would sleep
    pub fn schedule(&self, class: RetryClass, retries: u32) -> Vec<Duration> {
        (1..=retries.min(self.retries_for(class)))
            .map(|attempt| match class {
                RetryClass::RateLimited { .. } => self.rate_limit_delay(attempt),
                _ => self.generic_delay(attempt),
            })
            .collect()
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let millis = delay.as_millis() as i64;
        let jitter_range = (millis as f64 * self.jitter) as i64;
        if jitter_range == 0 {
            return delay;
        }
        let mut rng = rand::rng();
        let jitter_ms = rng.random_range(-jitter_range..=jitter_range);
        Duration::from_millis((millis + jitter_ms).max(0) as u64)
    }
}

/// Retry an async operation according to `policy`
///
/// Permanent errors are returned unchanged on the first occurrence.
/// When the retries allowed for an error's class run out, the last error is
/// wrapped in [`NokodeError::ExhaustedRetries`].
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    tracing::info!(
                        operation = operation_name,
                        attempts = retries + 1,
                        "succeeded after retrying"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                let class = error.retry_class();
                if class == RetryClass::Permanent {
                    tracing::debug!(
                        operation = operation_name,
                        error = %error,
                        "non-retryable error"
                    );
                    return Err(error);
                }

                let allowed = policy.retries_for(class);
                if retries >= allowed {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = retries + 1,
                        error = %error,
                        "retries exhausted"
                    );
                    return Err(NokodeError::ExhaustedRetries {
                        attempts: retries + 1,
                        source: Box::new(error),
                    });
                }

                retries += 1;
                let delay = policy.delay_for(retries, class);
                tracing::warn!(
                    operation = operation_name,
                    attempt = retries,
                    max_retries = allowed,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
