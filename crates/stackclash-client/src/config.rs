//! Client configuration.

use std::time::Duration;

use stackclash_transport::HeartbeatConfig;

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Growth per attempt.
    pub factor: f64,
    /// Upper bound on any single delay, jitter included.
    pub cap: Duration,
    /// Fraction of the delay added or removed at random, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

/// How many reconnect attempts to make before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Give up after this many consecutive failed attempts.
    Limited(u32),
    /// Keep trying at the capped delay forever.
    Unlimited,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Limited(10)
    }
}

/// Settings for [`ResilientClient`](crate::ResilientClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backoff: BackoffConfig,
    pub retry: RetryPolicy,

    /// Messages kept while offline. The oldest is dropped on overflow.
    pub queue_capacity: usize,

    /// Ping cadence. Should match the server's.
    pub heartbeat: HeartbeatConfig,

    /// Consecutive missed pongs that count as a dead connection.
    pub missed_heartbeats_before_reconnect: u32,

    /// Capacity of the event channel handed to the caller.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            retry: RetryPolicy::default(),
            queue_capacity: 100,
            heartbeat: HeartbeatConfig::default(),
            missed_heartbeats_before_reconnect: 3,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
