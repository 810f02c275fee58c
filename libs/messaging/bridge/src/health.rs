//! Peer liveness and socket cooldown

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No socket traffic observed yet, or the link closed cleanly
    Unknown,
    /// Frames from the peer are arriving on the current link
    Reachable,
    /// Declared dead; socket attempts paused until the cooldown ends
    Unreachable { cooldown_until: Instant },
}

#[derive(Debug)]
struct HealthState {
    state: PeerState,
    last_seen: Option<Instant>,
    state_changed_at: Instant,
}

impl HealthState {
    fn transition_to(&mut self, new_state: PeerState) {
        let changed = std::mem::discriminant(&self.state) != std::mem::discriminant(&new_state);
        if changed {
            info!(
                held_ms = self.state_changed_at.elapsed().as_millis() as u64,
                "Peer state transition: {:?} -> {:?}",
                self.state,
                new_state
            );
            self.state_changed_at = Instant::now();
        }
        self.state = new_state;
    }
}

/// Tracks whether the socket peer is alive
#[derive(Debug)]
pub struct PeerHealth {
    inner: RwLock<HealthState>,
}

impl Default for PeerHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerHealth {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HealthState {
                state: PeerState::Unknown,
                last_seen: None,
                state_changed_at: Instant::now(),
            }),
        }
    }

    pub fn state(&self) -> PeerState {
        self.inner.read().state
    }

    /// A frame arrived from the peer
    ///
    /// Only received traffic proves the peer is reading its end; a completed
    /// connect or accept does not.
    pub fn record_activity(&self) {
        let mut inner = self.inner.write();
        inner.last_seen = Some(Instant::now());
        if inner.state != PeerState::Reachable {
            inner.transition_to(PeerState::Reachable);
        }
    }

    /// A new link came up; the peer counts as reachable once it sends a frame
    pub fn record_link_established(&self) {
        let mut inner = self.inner.write();
        if inner.state == PeerState::Reachable {
            inner.transition_to(PeerState::Unknown);
        }
    }

    /// The link closed without a liveness failure
    pub fn record_disconnect(&self) {
        let mut inner = self.inner.write();
        if inner.state == PeerState::Reachable {
            inner.transition_to(PeerState::Unknown);
        }
    }

    /// Declare the peer dead and pause socket use for `cooldown`
    pub fn mark_unreachable(&self, cooldown: Duration) {
        let mut inner = self.inner.write();
        warn!(
            cooldown_ms = cooldown.as_millis() as u64,
            "Peer unreachable; routing over the mailbox during cooldown"
        );
        inner.transition_to(PeerState::Unreachable {
            cooldown_until: Instant::now() + cooldown,
        });
    }

    pub fn in_cooldown(&self) -> bool {
        match self.inner.read().state {
            PeerState::Unreachable { cooldown_until } => Instant::now() < cooldown_until,
            _ => false,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.state() == PeerState::Reachable
    }

    /// When the last frame arrived, if ever
    pub fn last_seen(&self) -> Option<Instant> {
        self.inner.read().last_seen
    }
}
