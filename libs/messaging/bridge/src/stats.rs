//! Coordinator counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    pub(crate) socket_sends: AtomicU64,
    pub(crate) mailbox_deposits: AtomicU64,
    pub(crate) fallbacks: AtomicU64,
    pub(crate) lock_retries: AtomicU64,
    pub(crate) heartbeats_sent: AtomicU64,
    pub(crate) inbound_socket: AtomicU64,
    pub(crate) inbound_mailbox: AtomicU64,
    pub(crate) decode_failures: AtomicU64,
    pub(crate) duplicates_dropped: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
}

impl StatsTracker {
    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            socket_sends: self.socket_sends.load(Ordering::Relaxed),
            mailbox_deposits: self.mailbox_deposits.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            lock_retries: self.lock_retries.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            inbound_socket: self.inbound_socket.load(Ordering::Relaxed),
            inbound_mailbox: self.inbound_mailbox.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time coordinator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Messages handed to the socket (heartbeats excluded)
    pub socket_sends: u64,
    pub mailbox_deposits: u64,
    /// Socket sends that failed and were retried through the mailbox
    pub fallbacks: u64,
    pub lock_retries: u64,
    pub heartbeats_sent: u64,
    pub inbound_socket: u64,
    pub inbound_mailbox: u64,
    pub decode_failures: u64,
    pub duplicates_dropped: u64,
    pub handler_failures: u64,
}
