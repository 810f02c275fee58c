//! Per-sender sequence and timestamp allocation
//!
//! Sequence ids start from wall-clock microseconds so a restarted sender keeps
//! counting upward and receivers deduplicating by sequence id stay correct.
//! Timestamps are strictly increasing within one generator even if the system
//! clock stalls or steps backwards.

use crate::error::ProtocolResult;
use crate::message::Message;
use crate::payload::Payload;
use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in nanoseconds (0 if the clock is before the epoch)
pub fn system_timestamp_ns() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
        Err(e) => {
            tracing::warn!("System time before UNIX epoch: {}", e);
            0
        }
    }
}

#[derive(Debug)]
struct SequenceState {
    next_sequence: u64,
    last_timestamp_ns: u64,
}

/// Allocates (sequence_id, timestamp_ns) pairs for one sender
#[derive(Debug)]
pub struct SequenceGenerator {
    state: Mutex<SequenceState>,
}

impl SequenceGenerator {
    /// Seed from the current wall clock
    pub fn new() -> Self {
        Self::starting_at(system_timestamp_ns() / 1_000)
    }

    /// Seed with an explicit first sequence id
    pub fn starting_at(first_sequence: u64) -> Self {
        Self {
            state: Mutex::new(SequenceState {
                next_sequence: first_sequence.max(1),
                last_timestamp_ns: 0,
            }),
        }
    }

    /// Allocate the next pair; both components increase strictly together
    pub fn next(&self) -> (u64, u64) {
        let mut state = self.state.lock();
        let sequence_id = state.next_sequence;
        state.next_sequence += 1;

        let now = system_timestamp_ns();
        let timestamp_ns = if now > state.last_timestamp_ns {
            now
        } else {
            state.last_timestamp_ns + 1
        };
        state.last_timestamp_ns = timestamp_ns;

        (sequence_id, timestamp_ns)
    }

    /// Build a message from a payload with freshly allocated ids
    pub fn stamp(&self, payload: impl Into<Payload>) -> ProtocolResult<Message> {
        let (sequence_id, timestamp_ns) = self.next();
        Message::new(sequence_id, timestamp_ns, payload)
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
