//! Heartbeat ping/pong bookkeeping and latency measurement.

use std::time::Duration;

use tokio::time::Instant;

use crate::channel::Channel;
use crate::envelope::Envelope;

/// Outcome of a heartbeat tick.
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatTick {
    /// Send this ping.
    Ping(Envelope),
    /// Too many pings went unanswered; the connection is dead.
    Dead { missed: u32 },
}

/// Tracks the outstanding ping on one connection.
///
/// At most one ping is outstanding; a tick that finds the previous ping
/// still unanswered counts as a miss.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    next_sequence: u64,
    outstanding: Option<(u64, Instant)>,
    missed: u32,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat tick. `max_missed == 0` disables dead detection.
    pub fn tick(&mut self, channel: Channel, max_missed: u32) -> HeartbeatTick {
        if self.outstanding.is_some() {
            self.missed += 1;
            if max_missed > 0 && self.missed >= max_missed {
                return HeartbeatTick::Dead { missed: self.missed };
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.outstanding = Some((sequence, Instant::now()));
        HeartbeatTick::Ping(Envelope::ping(channel, sequence))
    }

    /// Match a pong to the outstanding ping and return the round-trip time.
    ///
    /// Returns `None` when nothing is outstanding or the pong carries a
    /// different sequence.
    pub fn on_pong(&mut self, pong: &Envelope) -> Option<Duration> {
        let (sequence, sent_at) = self.outstanding?;
        if pong.sequence.is_some_and(|s| s != sequence) {
            return None;
        }
        self.outstanding = None;
        self.missed = 0;
        Some(sent_at.elapsed())
    }

    /// Consecutive unanswered pings.
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Whether a ping is awaiting its pong.
    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Forget any outstanding ping, e.g. when the connection is replaced.
    pub fn reset(&mut self) {
        self.outstanding = None;
        self.missed = 0;
    }
}
