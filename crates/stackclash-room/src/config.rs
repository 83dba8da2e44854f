//! Room configuration.

use std::time::Duration;

use stackclash_clock::ClockConfig;

// ---------------------------------------------------------------------------
// TieBreak
// ---------------------------------------------------------------------------

/// How a time-limit finish with equal scores is decided.
///
/// Both policies are deterministic; a match is never decided at random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Fewer KOs taken wins; if still tied, the player who queued first.
    #[default]
    FewerKosTakenThenEnqueueOrder,
    /// The player who queued first.
    EnqueueOrder,
}

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Match rules and room timeouts.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// KOs needed to win outright.
    pub ko_threshold: u32,

    /// Match length once Active.
    pub time_limit: Duration,

    /// Clock tick interval while Active.
    pub clock_tick: Duration,

    /// How long Starting waits for both `ready`s before going Active anyway.
    pub ready_timeout: Duration,

    /// How long a disconnected player has to come back before forfeiting.
    pub reconnect_grace: Duration,

    /// How long Ending waits for result acks before closing.
    pub ending_timeout: Duration,

    pub tie_break: TieBreak,

    /// Bounded inbox capacity of the room actor.
    pub inbox_size: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            ko_threshold: 3,
            time_limit: Duration::from_secs(240),
            clock_tick: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
            reconnect_grace: Duration::from_secs(20),
            ending_timeout: Duration::from_secs(5),
            tie_break: TieBreak::default(),
            inbox_size: 64,
        }
    }
}

impl RoomConfig {
    pub fn clock(&self) -> ClockConfig {
        ClockConfig {
            limit: self.time_limit,
            tick: self.clock_tick,
        }
    }
}
