//! The matchmaking queue and pairing pass.

use rand::Rng;
use stackclash_protocol::{MapId, MapPreference, PlayerStats, SessionToken, UserId, UserInfo};
use tokio::time::Instant;

use crate::QueueError;

/// A session waiting for an opponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub token: SessionToken,
    pub user_id: UserId,
    pub username: String,
    pub stats: PlayerStats,
    /// Arrival order. Lower tickets were queued earlier.
    pub ticket: u64,
    pub enqueued_at: Instant,
    pub preference: MapPreference,
}

impl QueueEntry {
    pub fn user(&self) -> UserInfo {
        UserInfo {
            user_id: self.user_id,
            username: self.username.clone(),
            stats: self.stats,
        }
    }

    fn can_pair_with(&self, other: &Self) -> bool {
        self.user_id != other.user_id && self.preference.is_compatible(other.preference)
    }
}

/// Two entries popped from the queue, ready for a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    /// The entry that was queued first.
    pub first: QueueEntry,
    pub second: QueueEntry,
    pub map: MapId,
}

/// FIFO queue of waiting sessions.
///
/// A plain struct: the server guards it with one mutex and only holds the
/// lock long enough to enqueue, cancel, or pop pairs.
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    /// Always sorted by ticket, oldest first.
    entries: Vec<QueueEntry>,
    next_ticket: u64,
    pairs_made: u64,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session to the back of the queue. Returns its 1-based position.
    ///
    /// # Errors
    /// [`QueueError::AlreadyQueued`] if the token already has an entry.
    pub fn enqueue(
        &mut self,
        token: SessionToken,
        user: UserInfo,
        preference: MapPreference,
    ) -> Result<usize, QueueError> {
        if self.contains(&token) {
            return Err(QueueError::AlreadyQueued);
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        tracing::debug!(user_id = %user.user_id, ticket, ?preference, "enqueued");
        self.entries.push(QueueEntry {
            token,
            user_id: user.user_id,
            username: user.username,
            stats: user.stats,
            ticket,
            enqueued_at: Instant::now(),
            preference,
        });
        Ok(self.entries.len())
    }

    /// Removes a session's entry.
    ///
    /// # Errors
    /// [`QueueError::NotQueued`] if there is no entry for `token`.
    pub fn cancel(&mut self, token: &SessionToken) -> Result<QueueEntry, QueueError> {
        let index = self
            .entries
            .iter()
            .position(|e| &e.token == token)
            .ok_or(QueueError::NotQueued)?;
        let entry = self.entries.remove(index);
        tracing::debug!(
            user_id = %entry.user_id,
            waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
            "left queue"
        );
        Ok(entry)
    }

    /// Pops the first compatible pair, scanning oldest first.
    ///
    /// For the oldest entry that has any partner, the partner is the oldest
    /// entry with the *same* preference if there is one, otherwise the
    /// oldest merely compatible one. An entry never pairs with itself or
    /// with another entry of the same user.
    pub fn pair_next(&mut self, rng: &mut impl Rng) -> Option<Pairing> {
        let (i, j) = self.find_pair()?;
        // j > i, so removing j first keeps i valid.
        let second = self.entries.remove(j);
        let first = self.entries.remove(i);
        let map = resolve_map(first.preference, second.preference, rng);
        self.pairs_made += 1;
        tracing::info!(
            first = %first.user_id,
            second = %second.user_id,
            %map,
            "players paired"
        );
        Some(Pairing { first, second, map })
    }

    /// Pops pairs until no compatible pair remains.
    pub fn pair_all(&mut self, rng: &mut impl Rng) -> Vec<Pairing> {
        std::iter::from_fn(|| self.pair_next(&mut *rng)).collect()
    }

    /// 1-based position of `token`, if queued.
    pub fn queue_position(&self, token: &SessionToken) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| &e.token == token)
            .map(|i| i + 1)
    }

    pub fn contains(&self, token: &SessionToken) -> bool {
        self.entries.iter().any(|e| &e.token == token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total pairs made since the queue was created.
    pub fn pairs_made(&self) -> u64 {
        self.pairs_made
    }

    fn find_pair(&self) -> Option<(usize, usize)> {
        // Earlier entries already failed to match anything before them,
        // so only later entries need checking.
        for (i, entry) in self.entries.iter().enumerate() {
            let mut fallback = None;
            for (j, other) in self.entries.iter().enumerate().skip(i + 1) {
                if !entry.can_pair_with(other) {
                    continue;
                }
                if entry.preference == other.preference {
                    return Some((i, j));
                }
                fallback.get_or_insert(j);
            }
            if let Some(j) = fallback {
                return Some((i, j));
            }
        }
        None
    }
}

/// Picks the map for two compatible preferences.
///
/// Concrete preferences win over `NoPreference`; `Random` flips a fair
/// coin; two players without a preference get the standard map.
pub fn resolve_map(a: MapPreference, b: MapPreference, rng: &mut impl Rng) -> MapId {
    let chosen = match (a, b) {
        (MapPreference::NoPreference, other) => other,
        (mine, _) => mine,
    };
    match chosen {
        MapPreference::Standard | MapPreference::NoPreference => MapId::Standard,
        MapPreference::Classic => MapId::Classic,
        MapPreference::Random => {
            if rng.random_bool(0.5) {
                MapId::Standard
            } else {
                MapId::Classic
            }
        }
    }
}
