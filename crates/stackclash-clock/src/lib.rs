//! Match clock for StackClash rooms.
//!
//! A [`MatchClock`] counts down a fixed time limit and wakes the room
//! actor once per tick so it can refresh the clock it shows players and
//! notice expiry. Before [`start`](MatchClock::start) and after
//! [`stop`](MatchClock::stop), [`wait_for_tick`](MatchClock::wait_for_tick)
//! pends forever, which is what a `tokio::select!` branch wants while a
//! match is not live.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = inbox.recv() => { /* handle commands */ }
//!         tick = clock.wait_for_tick() => {
//!             if tick.expired { /* decide by time limit */ }
//!         }
//!     }
//! }
//! ```
//!
//! All timing uses `tokio::time`, so tests drive it with a paused clock.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Clock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// Total match time.
    pub limit: Duration,
    /// Interval between ticks.
    pub tick: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            limit: Duration::from_secs(240),
            tick: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Returned by [`MatchClock::wait_for_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    /// Starts at 1.
    pub tick: u64,
    pub elapsed: Duration,
    pub remaining: Duration,
    /// `true` on the tick that reaches the limit. The clock stops itself.
    pub expired: bool,
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum ClockState {
    Idle,
    Running { started_at: Instant, next_tick: Instant },
    Stopped { elapsed: Duration },
}

/// Time-limited match clock driven by a fixed tick.
#[derive(Debug)]
pub struct MatchClock {
    config: ClockConfig,
    state: ClockState,
    tick_count: u64,
}

impl MatchClock {
    pub fn new(config: ClockConfig) -> Self {
        let config = ClockConfig {
            tick: config.tick.max(Duration::from_millis(1)),
            ..config
        };
        Self {
            config,
            state: ClockState::Idle,
            tick_count: 0,
        }
    }

    /// Starts counting. Calling it again has no effect.
    pub fn start(&mut self) {
        if let ClockState::Idle = self.state {
            let now = Instant::now();
            self.state = ClockState::Running {
                started_at: now,
                next_tick: self.next_after(now, now),
            };
            debug!(limit_s = self.config.limit.as_secs(), "match clock started");
        }
    }

    /// Freezes the clock. [`elapsed`](Self::elapsed) keeps its final value.
    pub fn stop(&mut self) {
        if let ClockState::Running { .. } = self.state {
            let elapsed = self.elapsed();
            self.state = ClockState::Stopped { elapsed };
            debug!(elapsed_ms = elapsed.as_millis() as u64, "match clock stopped");
        }
    }

    /// Waits for the next tick.
    ///
    /// Pends forever unless the clock is running. The final tick lands
    /// exactly on the limit, reports `expired`, and stops the clock.
    pub async fn wait_for_tick(&mut self) -> ClockTick {
        let ClockState::Running { started_at, next_tick } = self.state else {
            std::future::pending::<()>().await;
            unreachable!()
        };

        time::sleep_until(next_tick).await;

        let now = Instant::now();
        let late_by = now.saturating_duration_since(next_tick);
        if late_by > self.config.tick / 10 {
            warn!(
                tick = self.tick_count + 1,
                late_ms = late_by.as_millis() as u64,
                "clock tick fired late"
            );
        }

        self.tick_count += 1;
        let elapsed = now.duration_since(started_at).min(self.config.limit);
        let expired = elapsed >= self.config.limit;
        if expired {
            self.state = ClockState::Stopped { elapsed };
            debug!(tick = self.tick_count, "match clock expired");
        } else {
            // Schedule from now so a late wake never causes a burst.
            self.state = ClockState::Running {
                started_at,
                next_tick: self.next_after(started_at, now),
            };
        }
        trace!(tick = self.tick_count, expired, "clock tick");

        ClockTick {
            tick: self.tick_count,
            elapsed,
            remaining: self.config.limit - elapsed,
            expired,
        }
    }

    /// Time counted so far, capped at the limit.
    pub fn elapsed(&self) -> Duration {
        match self.state {
            ClockState::Idle => Duration::ZERO,
            ClockState::Running { started_at, .. } => started_at.elapsed().min(self.config.limit),
            ClockState::Stopped { elapsed } => elapsed,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.config.limit.saturating_sub(self.elapsed())
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ClockState::Running { .. })
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn config(&self) -> ClockConfig {
        self.config
    }

    /// Next tick after `now`, clamped to the deadline.
    fn next_after(&self, started_at: Instant, now: Instant) -> Instant {
        (now + self.config.tick).min(started_at + self.config.limit)
    }
}
