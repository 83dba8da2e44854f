//! Ping/pong liveness detection shared by server sessions and clients.
//!
//! The monitor is a pure state machine: callers feed it the current time
//! and tell it when pongs arrive; it tells them when a ping is due and how
//! many pongs in a row have gone missing. What to do about misses (enter
//! grace on the server, reconnect on the client) is the caller's call.
//!
//! ```text
//!   ping sent ──(pong with same nonce)──→ missed = 0
//!       │
//!       └──(timeout elapses first)──────→ missed += 1
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Heartbeat cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings.
    pub interval: Duration,
    /// How long to wait for the matching pong before counting a miss.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(10),
        }
    }
}

/// What the caller should do after polling the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// Nothing to send right now.
    Idle,
    /// Send a ping carrying this nonce.
    SendPing(u64),
}

/// Tracks outstanding pings and consecutive misses for one connection.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    next_ping_at: Instant,
    awaiting: Option<(u64, Instant)>,
    next_nonce: u64,
    missed: u32,
}

impl HeartbeatMonitor {
    /// Creates a monitor whose first ping is due one interval after `now`.
    pub fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            next_ping_at: now + config.interval,
            awaiting: None,
            next_nonce: 1,
            missed: 0,
        }
    }

    /// Advances the state machine to `now`.
    ///
    /// Counts a miss for an outstanding ping whose timeout has elapsed, then
    /// reports whether a new ping is due. A ping that is still outstanding
    /// when the next one is due is counted as missed at that point.
    pub fn poll(&mut self, now: Instant) -> HeartbeatStatus {
        if let Some((nonce, sent_at)) = self.awaiting {
            if now >= sent_at + self.config.timeout || now >= self.next_ping_at {
                self.missed += 1;
                self.awaiting = None;
                tracing::debug!(nonce, missed = self.missed, "heartbeat pong missed");
            }
        }

        if now >= self.next_ping_at {
            let nonce = self.next_nonce;
            self.next_nonce += 1;
            self.awaiting = Some((nonce, now));
            self.next_ping_at = now + self.config.interval;
            return HeartbeatStatus::SendPing(nonce);
        }

        HeartbeatStatus::Idle
    }

    /// Records a pong. Only the pong for the outstanding ping clears misses;
    /// stale nonces are ignored.
    pub fn record_pong(&mut self, nonce: u64) -> bool {
        match self.awaiting {
            Some((expected, _)) if expected == nonce => {
                self.awaiting = None;
                self.missed = 0;
                true
            }
            _ => false,
        }
    }

    /// Consecutive pings that went unanswered.
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// The next instant at which [`poll`](Self::poll) can change state.
    pub fn next_deadline(&self) -> Instant {
        match self.awaiting {
            Some((_, sent_at)) => (sent_at + self.config.timeout).min(self.next_ping_at),
            None => self.next_ping_at,
        }
    }

    /// The configured cadence.
    pub fn config(&self) -> HeartbeatConfig {
        self.config
    }
}
