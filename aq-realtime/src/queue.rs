//! Bounded outbound queue for sends made while a channel is not open.

use std::collections::VecDeque;

use crate::envelope::Envelope;

/// FIFO of not-yet-sent envelopes. When full, the oldest entry is evicted.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<Envelope>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope, evicting from the front until `len <= capacity`.
    ///
    /// Returns the evicted envelopes, oldest first.
    pub fn push(&mut self, envelope: Envelope, capacity: usize) -> Vec<Envelope> {
        self.entries.push_back(envelope);
        let excess = self.entries.len().saturating_sub(capacity.max(1));
        self.entries.drain(..excess).collect()
    }

    /// Remove and return the oldest entry.
    pub fn pop_front(&mut self) -> Option<Envelope> {
        self.entries.pop_front()
    }

    /// Put an entry back at the front, e.g. after a failed transmit.
    pub fn push_front(&mut self, envelope: Envelope) {
        self.entries.push_front(envelope);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use serde_json::json;

    fn entry(n: u64) -> Envelope {
        Envelope::outbound(Channel::Market, json!({ "n": n }))
    }

    fn numbers(queue: &OutboundQueue) -> Vec<u64> {
        queue
            .entries
            .iter()
            .map(|e| e.data["n"].as_u64().unwrap())
            .collect()
    }

    #[test]
    fn test_preserves_insertion_order() {
        let mut queue = OutboundQueue::new();
        for n in 0..4 {
            assert!(queue.push(entry(n), 10).is_empty());
        }
        assert_eq!(numbers(&queue), vec![0, 1, 2, 3]);
        assert_eq!(queue.pop_front().unwrap().data["n"], 0);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut queue = OutboundQueue::new();
        for n in 0..3 {
            queue.push(entry(n), 3);
        }
        let evicted = queue.push(entry(3), 3);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].data["n"], 0);
        assert_eq!(numbers(&queue), vec![1, 2, 3]);
    }

    #[test]
    fn test_shrunk_capacity_evicts_several() {
        let mut queue = OutboundQueue::new();
        for n in 0..5 {
            queue.push(entry(n), 10);
        }
        let evicted = queue.push(entry(5), 2);
        assert_eq!(evicted.len(), 4);
        assert_eq!(numbers(&queue), vec![4, 5]);
    }

    #[test]
    fn test_push_front_restores_order() {
        let mut queue = OutboundQueue::new();
        queue.push(entry(1), 10);
        queue.push(entry(2), 10);
        let first = queue.pop_front().unwrap();
        queue.push_front(first);
        assert_eq!(numbers(&queue), vec![1, 2]);
    }
}
