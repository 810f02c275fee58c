//! Channel activity counters

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters updated on the send and receive paths
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
    last_activity: RwLock<Option<Instant>>,
}

impl StatsTracker {
    #[inline]
    pub(crate) fn record_send(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.last_activity.write() = Some(Instant::now());
    }

    #[inline]
    pub(crate) fn record_receive(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.last_activity.write() = Some(Instant::now());
    }

    pub(crate) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.write() = Some(Instant::now());
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            idle_for: self.last_activity.read().map(|at| at.elapsed()),
        }
    }
}

/// Point-in-time channel statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_sent: u64,
    /// Payload bytes, excluding length prefixes
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub connects: u64,
    pub disconnects: u64,
    /// Time since the last frame or connect, if any
    pub idle_for: Option<Duration>,
}
