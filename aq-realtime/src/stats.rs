//! Process-wide transport counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

const NO_LATENCY: u64 = u64::MAX;

/// Atomic counters shared by every channel.
#[derive(Debug)]
pub struct TransportStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    reconnects: AtomicU64,
    errors: AtomicU64,
    latency_ms: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reconnects: u64,
    pub errors: u64,
    /// Last measured heartbeat round trip.
    pub latency_ms: Option<u64>,
}

impl Default for TransportStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportStats {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            latency_ms: AtomicU64::new(NO_LATENCY),
        }
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_ms: u64) {
        self.latency_ms
            .store(latency_ms.min(NO_LATENCY - 1), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            latency_ms: (latency != NO_LATENCY).then_some(latency),
        }
    }

    pub fn reset(&self) {
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.latency_ms.store(NO_LATENCY, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = TransportStats::new();
        stats.record_sent(10);
        stats.record_sent(5);
        stats.record_received(100);
        stats.record_reconnect();
        stats.record_error();
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.bytes_sent, 15);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.bytes_received, 100);
        assert_eq!(snap.reconnects, 1);
        assert_eq!(snap.errors, 2);
        assert_eq!(snap.latency_ms, None);
    }

    #[test]
    fn test_latency_keeps_last_measurement() {
        let stats = TransportStats::new();
        stats.record_latency(40);
        stats.record_latency(25);
        assert_eq!(stats.snapshot().latency_ms, Some(25));
    }

    #[test]
    fn test_reset_clears_everything() {
        let stats = TransportStats::new();
        stats.record_sent(1);
        stats.record_latency(12);
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = TransportStats::new();
        stats.record_latency(8);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["latency_ms"], 8);
        assert_eq!(json["messages_sent"], 0);
    }
}
