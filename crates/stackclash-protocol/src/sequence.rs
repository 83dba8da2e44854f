//! Client-side ordering check for room messages.
//!
//! A room numbers the messages it sends each player 1, 2, 3, ... with no
//! gaps. The guard accepts a room message only if its seq is exactly one
//! more than the last accepted one. `match_found` and `resync` re-base the
//! counter, since they start a fresh view of the room.

use crate::ServerMessage;

/// Verdict for one inbound server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Apply the message.
    Accepted,
    /// A room message arrived out of order. Drop it and ask for a resync.
    Gap { expected: u64, got: u64 },
}

/// Tracks the last accepted room sequence number.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    last: Option<u64>,
    discarded: u64,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `msg` and, if accepted, advances the counter.
    ///
    /// Non-room messages are always accepted and never move the counter.
    pub fn check(&mut self, msg: &ServerMessage) -> SequenceCheck {
        let Some(seq) = msg.room_seq() else {
            return SequenceCheck::Accepted;
        };

        let rebase = matches!(
            msg,
            ServerMessage::MatchFound { .. } | ServerMessage::Resync { .. }
        );
        if rebase {
            self.last = Some(seq);
            return SequenceCheck::Accepted;
        }

        let expected = self.last.map_or(1, |last| last + 1);
        if seq == expected {
            self.last = Some(seq);
            SequenceCheck::Accepted
        } else {
            self.discarded += 1;
            tracing::warn!(expected, got = seq, "room message out of sequence, discarded");
            SequenceCheck::Gap { expected, got: seq }
        }
    }

    /// The last accepted room seq, if any.
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// How many room messages were discarded so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Forgets the room, e.g. after its match result has been shown.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
