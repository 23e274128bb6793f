// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Outbound call spacing
//!
//! A [`RateLimiter`] enforces a minimum interval between consecutive vendor
//! calls across every in-flight request. Callers reserve the next free slot
//! under a short-lived lock and then sleep without holding it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{ProviderKind, RateLimitConfig};

/// Minimum-interval limiter shared by all requests of one process
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    /// Earliest instant the next caller may proceed
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given minimum spacing
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Build the limiter for one provider from configuration
    pub fn from_config(config: &RateLimitConfig, provider: ProviderKind) -> Self {
        Self::new(Duration::from_millis(config.interval_for(provider)))
    }

    /// Configured minimum spacing
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve a slot and return how long the caller must wait for it
    fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut next_slot = match self.next_slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Rate limiter lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let slot = match *next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        *next_slot = Some(slot + self.interval);
        slot.saturating_duration_since(now)
    }

    /// Wait until this caller's slot arrives. Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        if self.interval.is_zero() {
            return Duration::ZERO;
        }

        let wait = self.reserve();
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limiting vendor call");
            tokio::time::sleep(wait).await;
        }
        wait
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(3000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_call_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        let waited = limiter.acquire().await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_second_call_waits_for_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..5 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_distinct_slots() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(30)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        // Three callers need two full intervals between them.
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn test_idle_period_resets_spacing() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[test]
    fn test_from_config_uses_provider_override() {
        let mut per_provider = HashMap::new();
        per_provider.insert(ProviderKind::Spark, 5000);
        let config = RateLimitConfig {
            min_interval_ms: 3000,
            per_provider,
        };

        assert_eq!(
            RateLimiter::from_config(&config, ProviderKind::Spark).interval(),
            Duration::from_millis(5000)
        );
        assert_eq!(
            RateLimiter::from_config(&config, ProviderKind::OpenAi).interval(),
            Duration::from_millis(3000)
        );
    }
}
