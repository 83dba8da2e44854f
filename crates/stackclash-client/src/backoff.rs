//! Reconnect delay schedule.

use std::time::Duration;

use rand::Rng;

use crate::{BackoffConfig, RetryPolicy};

/// Exponential backoff with jitter.
///
/// Delay `n` (0-based) is `base * factor^n`, capped, then scaled by a
/// random factor in `1 ± jitter` and capped again.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig, policy: RetryPolicy) -> Self {
        Self {
            config,
            policy,
            attempts: 0,
        }
    }

    /// The delay before the next attempt, or `None` once the policy is
    /// exhausted. Counts the attempt.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let exponent = self.attempts.min(64) as i32;
        self.attempts += 1;

        let cap = self.config.cap.as_secs_f64();
        let raw = (self.config.base.as_secs_f64() * self.config.factor.powi(exponent)).min(cap);
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let scaled = if jitter > 0.0 {
            raw * rand::rng().random_range(1.0 - jitter..=1.0 + jitter)
        } else {
            raw
        };
        Some(Duration::from_secs_f64(scaled.clamp(0.0, cap)))
    }

    /// Forgets past failures, e.g. after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts counted since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        match self.policy {
            RetryPolicy::Limited(max) => self.attempts >= max,
            RetryPolicy::Unlimited => false,
        }
    }
}
