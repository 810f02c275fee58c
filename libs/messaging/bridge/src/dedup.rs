//! Receiver-side duplicate suppression
//!
//! Remembers the most recent sequence ids per origin. Sequence ids are unique
//! per sender, so a repeat within the window is a redelivery (for example an
//! orphaned mailbox entry recovered after its first copy was handled).

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
struct OriginWindow {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

/// Sliding window of recent sequence ids per origin
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    origins: Mutex<HashMap<String, OriginWindow>>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Record `sequence_id`; returns false if it was already in the window
    pub fn observe(&self, origin: &str, sequence_id: u64) -> bool {
        let mut origins = self.origins.lock();
        let window = origins.entry(origin.to_string()).or_default();

        if !window.seen.insert(sequence_id) {
            return false;
        }
        window.order.push_back(sequence_id);

        // Oldest ids fall out first
        while window.order.len() > self.capacity {
            if let Some(evicted) = window.order.pop_front() {
                window.seen.remove(&evicted);
            }
        }
        true
    }
}
