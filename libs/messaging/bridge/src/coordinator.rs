//! Delivery Coordinator
//!
//! Owns one peer's transports and every background task serving them:
//!
//! ```text
//!  submit ─► Session ─► dispatch ─┬─► SocketChannel (connected, peer heard from on this link)
//!                                 └─► Mailbox::deposit (otherwise, or on send failure)
//!
//!  link manager    keeps the socket dialed / accepted, turns dialers away during cooldown
//!  socket events   decodes frames, tracks liveness
//!  mailbox poller  claims peer entries, archives the outcome
//!  heartbeat       socket-only liveness beacon
//! ```
//!
//! A message goes to exactly one transport. The mailbox is used only when the
//! socket is unavailable or the socket send fails before completing. A freshly
//! established link is not used until the peer's first frame arrives on it, so
//! a connection sitting unaccepted in a listen backlog never carries messages.

use crate::error::{DeliveryError, SessionError};
use crate::handle::{DeliveryHandle, Route};
use crate::handler::MessageHandler;
use crate::health::{PeerHealth, PeerState};
use crate::session::{InboundOutcome, Outbound, Session};
use crate::stats::{CoordinatorStats, StatsTracker};
use async_trait::async_trait;
use bridge_config::BridgeConfig;
use codec::{
    decode, encode, HeartbeatPayload, Message, MessageType, Payload, ProtocolResult,
    SequenceGenerator, SignalPayload, StatusMap,
};
use mailbox::{ClaimedEntry, LockMode, Mailbox};
use network::{
    ChannelEvent, ConnectionState, SocketChannel, SocketChannelConfig, SocketRole, TransportError,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Dedup origin for frames received over the socket
const SOCKET_ORIGIN: &str = "@socket";

/// Frames buffered between the socket reader and the session
const EVENT_QUEUE_DEPTH: usize = 256;

/// Pause between link establishment attempts
const RECONNECT_PAUSE: Duration = Duration::from_millis(100);

struct Inner {
    config: BridgeConfig,
    channel: SocketChannel,
    mailbox: Mailbox,
    sequence: SequenceGenerator,
    health: PeerHealth,
    session: Session,
    stats: StatsTracker,
    shut_down: AtomicBool,
}

/// Bridge endpoint for one peer
pub struct DeliveryCoordinator {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl DeliveryCoordinator {
    /// Validate the configuration and open the mailbox; no tasks run yet
    ///
    /// Register handlers before [`start`](Self::start) so no inbound message
    /// arrives without one.
    pub async fn new(config: BridgeConfig) -> Result<Self, DeliveryError> {
        config
            .validate()
            .map_err(|e| DeliveryError::Configuration(e.to_string()))?;

        let mailbox = Mailbox::open(&config.mailbox_root, config.lock_timeout()).await?;

        let role = match config.socket_role {
            bridge_config::SocketRole::Connect => SocketRole::Connect,
            bridge_config::SocketRole::Listen => SocketRole::Listen,
        };
        let mut channel_config = SocketChannelConfig::new(config.socket_address.clone(), role);
        channel_config.connect_timeout = config.connect_timeout();
        channel_config.io_timeout = config.io_timeout();
        channel_config.read_idle_timeout = config.liveness_window();
        channel_config.max_frame_bytes = config.max_frame_bytes;

        let session = Session::new(config.ack_deadline(), config.dedup_window);

        info!(
            node_id = %config.node_id,
            address = %config.socket_address,
            role = %config.socket_role,
            mailbox = %config.mailbox_root.display(),
            "Delivery coordinator created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                channel: SocketChannel::new(channel_config),
                mailbox,
                sequence: SequenceGenerator::new(),
                health: PeerHealth::new(),
                session,
                stats: StatsTracker::default(),
                shut_down: AtomicBool::new(false),
                config,
            }),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Recover orphaned entries and spawn the background tasks; idempotent
    pub async fn start(&self) -> Result<(), DeliveryError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(DeliveryError::ShutDown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let inner = &self.inner;

        match inner.mailbox.recover_orphans(&inner.config.node_id).await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Returned orphaned mailbox entries to incoming"),
            Err(e) if e.is_lock_contention() => {
                warn!("Mailbox lock busy; orphan recovery skipped this start")
            }
            Err(e) => return Err(e.into()),
        }

        if inner.config.socket_role == bridge_config::SocketRole::Listen {
            inner.channel.bind().await?;
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(run_link_manager(inner.clone(), events_tx)));
        tasks.push(tokio::spawn(run_socket_events(inner.clone(), events_rx)));
        tasks.push(tokio::spawn(run_mailbox_poller(inner.clone())));
        tasks.push(tokio::spawn(run_heartbeat(inner.clone())));

        info!(node_id = %inner.config.node_id, "Delivery coordinator started");
        Ok(())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn node_id(&self) -> &str {
        &self.inner.config.node_id
    }

    pub fn register_handler(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.inner.session.register_handler(message_type, handler);
    }

    /// Send a payload; the handle reports the delivery outcome
    pub async fn submit(&self, payload: impl Into<Payload>) -> Result<DeliveryHandle, DeliveryError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(DeliveryError::ShutDown);
        }
        self.inner
            .session
            .submit(self.inner.as_ref(), payload.into())
            .await
    }

    pub async fn submit_signal(&self, signal: SignalPayload) -> Result<DeliveryHandle, DeliveryError> {
        self.submit(signal).await
    }

    /// Query the peer's status; empty `fields` returns everything
    pub async fn request_status(&self, fields: Vec<String>) -> Result<StatusMap, SessionError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(SessionError::ShutDown);
        }
        self.inner
            .session
            .request_status(self.inner.as_ref(), fields)
            .await
    }

    /// Hand an already built message to one transport without tracking it
    pub async fn dispatch(&self, message: &Message) -> Result<Route, DeliveryError> {
        self.inner.dispatch(message).await
    }

    /// Local `bridge.*` status entries
    pub fn status(&self) -> StatusMap {
        self.inner.bridge_status()
    }

    pub fn socket_state(&self) -> ConnectionState {
        self.inner.channel.state()
    }

    pub fn peer_reachable(&self) -> bool {
        self.inner.health.is_reachable()
    }

    pub fn peer_state(&self) -> PeerState {
        self.inner.health.state()
    }

    pub fn lock_mode(&self) -> LockMode {
        self.inner.mailbox.lock_mode()
    }

    /// Bound listener address (listen role, after start)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.channel.local_addr()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.inner.mailbox
    }

    pub fn pending_deliveries(&self) -> usize {
        self.inner.session.pending_deliveries()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.inner.stats.snapshot()
    }

    /// Stop all tasks, close the socket and fail everything still pending
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        self.inner.session.shutdown();
        self.inner.channel.close().await;
        info!(node_id = %self.inner.config.node_id, "Delivery coordinator shut down");
    }
}

impl Drop for DeliveryCoordinator {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for DeliveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryCoordinator")
            .field("node_id", &self.inner.config.node_id)
            .field("channel", &self.inner.channel)
            .field("peer", &self.inner.health.state())
            .finish()
    }
}

impl Inner {
    /// Connected, and the peer has sent a frame on this link
    fn socket_usable(&self) -> bool {
        self.channel.is_connected() && self.health.is_reachable()
    }

    async fn deposit_with_retry(&self, sequence_id: u64, bytes: &[u8]) -> Result<(), DeliveryError> {
        let attempts = self.config.lock_retry_limit;
        let mut backoff = self.config.lock_backoff();

        for attempt in 1..=attempts {
            match self
                .mailbox
                .deposit(&self.config.node_id, sequence_id, bytes)
                .await
            {
                Ok(_) => {
                    StatsTracker::incr(&self.stats.mailbox_deposits);
                    return Ok(());
                }
                Err(e) if e.is_lock_contention() => {
                    if attempt == attempts {
                        break;
                    }
                    StatsTracker::incr(&self.stats.lock_retries);
                    debug!(sequence_id, attempt, backoff_ms = backoff.as_millis() as u64, "Mailbox lock busy; backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(DeliveryError::Mailbox(e)),
            }
        }

        warn!(sequence_id, attempts, "Mailbox lock contended; giving up");
        Err(DeliveryError::LockContention { attempts })
    }

    /// Heartbeats go out on any live link, verified or not, so both ends can
    /// prove themselves to each other
    async fn send_heartbeat(&self) {
        if !self.channel.is_connected() || self.health.in_cooldown() {
            return;
        }
        let payload = HeartbeatPayload {
            interval_ms: self.config.heartbeat_interval_ms,
        };
        let message = match self.sequence.stamp(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to build heartbeat");
                return;
            }
        };
        match self.channel.send(&encode(&message)).await {
            Ok(()) => StatsTracker::incr(&self.stats.heartbeats_sent),
            Err(e) => {
                debug!(error = %e, "Heartbeat not sent");
                if !self.channel.is_connected() {
                    self.health.record_disconnect();
                }
            }
        }
    }

    async fn handle_socket_frame(&self, frame: &[u8]) {
        match decode(frame) {
            Ok(message) => {
                StatsTracker::incr(&self.stats.inbound_socket);
                let outcome = self.session.handle_inbound(self, &message, SOCKET_ORIGIN).await;
                self.record_outcome(&outcome);
            }
            Err(e) => {
                // The stream can no longer be trusted to be frame-aligned
                StatsTracker::incr(&self.stats.decode_failures);
                warn!(error = %e, kind = e.kind(), "Undecodable socket frame; resetting connection");
                self.channel.disconnect().await;
                self.health.record_disconnect();
            }
        }
    }

    async fn process_mailbox_entry(&self, entry: ClaimedEntry) {
        let outcome = match decode(&entry.bytes) {
            Ok(message) if message.sequence_id() != entry.name.sequence_id() => {
                StatsTracker::incr(&self.stats.decode_failures);
                InboundOutcome::Rejected(format!(
                    "sequence id {} does not match entry name",
                    message.sequence_id()
                ))
            }
            Ok(message) => {
                StatsTracker::incr(&self.stats.inbound_mailbox);
                self.session
                    .handle_inbound(self, &message, entry.name.origin())
                    .await
            }
            Err(e) => {
                StatsTracker::incr(&self.stats.decode_failures);
                InboundOutcome::Rejected(format!("decode failed ({}): {}", e.kind(), e))
            }
        };
        self.record_outcome(&outcome);

        let archived = match &outcome {
            InboundOutcome::Accepted | InboundOutcome::Duplicate => self.mailbox.confirm(&entry).await,
            InboundOutcome::Rejected(reason) => self.mailbox.fail(&entry, reason).await,
        };
        if let Err(e) = archived {
            warn!(entry = %entry.name, error = %e, category = e.category(), "Failed to archive mailbox entry");
        }
    }

    fn record_outcome(&self, outcome: &InboundOutcome) {
        match outcome {
            InboundOutcome::Accepted => {}
            InboundOutcome::Duplicate => StatsTracker::incr(&self.stats.duplicates_dropped),
            InboundOutcome::Rejected(_) => StatsTracker::incr(&self.stats.handler_failures),
        }
    }
}

#[async_trait]
impl Outbound for Inner {
    fn stamp(&self, payload: Payload) -> ProtocolResult<Message> {
        self.sequence.stamp(payload)
    }

    async fn dispatch(&self, message: &Message) -> Result<Route, DeliveryError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DeliveryError::ShutDown);
        }
        let sequence_id = message.sequence_id();
        let bytes = encode(message);

        if self.socket_usable() {
            match self.channel.send(&bytes).await {
                Ok(()) => {
                    StatsTracker::incr(&self.stats.socket_sends);
                    return Ok(Route::Socket);
                }
                Err(e) => {
                    warn!(
                        sequence_id,
                        error = %e,
                        category = e.category(),
                        "Socket send failed; falling back to mailbox"
                    );
                    if !self.channel.is_connected() {
                        self.health.record_disconnect();
                    }
                    StatsTracker::incr(&self.stats.fallbacks);
                }
            }
        }

        self.deposit_with_retry(sequence_id, &bytes).await?;
        debug!(sequence_id, "Message deposited in mailbox");
        Ok(Route::Mailbox)
    }

    fn bridge_status(&self) -> StatusMap {
        let mut status = StatusMap::new();
        status.insert("bridge.node_id".to_string(), self.config.node_id.clone());
        status.insert(
            "bridge.socket_state".to_string(),
            self.channel.state().as_str().to_string(),
        );
        status.insert(
            "bridge.peer_reachable".to_string(),
            self.health.is_reachable().to_string(),
        );
        if let Some(last_seen) = self.health.last_seen() {
            status.insert(
                "bridge.peer_idle_ms".to_string(),
                last_seen.elapsed().as_millis().to_string(),
            );
        }
        let channel = self.channel.stats();
        status.insert(
            "bridge.socket_frames_sent".to_string(),
            channel.frames_sent.to_string(),
        );
        status.insert(
            "bridge.socket_frames_received".to_string(),
            channel.frames_received.to_string(),
        );
        status.insert(
            "bridge.lock_mode".to_string(),
            self.mailbox.lock_mode().as_str().to_string(),
        );
        status.insert(
            "bridge.pending_deliveries".to_string(),
            self.session.pending_deliveries().to_string(),
        );
        status
    }
}

async fn run_link_manager(inner: Arc<Inner>, events: mpsc::Sender<ChannelEvent>) {
    let listening = inner.config.socket_role == bridge_config::SocketRole::Listen;
    loop {
        if inner.channel.is_connected() {
            tokio::time::sleep(RECONNECT_PAUSE).await;
            continue;
        }

        if inner.health.in_cooldown() {
            // Drain the backlog so a dialer sees a close rather than a socket nobody reads
            if listening {
                match inner.channel.turn_away().await {
                    Ok(Some(peer)) => debug!(%peer, "Peer cooling down; connection refused"),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, category = e.category(), "Turn-away accept failed"),
                }
            }
        } else {
            match inner.channel.establish(events.clone()).await {
                Ok(peer) => {
                    inner.health.record_link_established();
                    debug!(%peer, "Socket link established; awaiting first frame");
                    inner.send_heartbeat().await;
                }
                Err(e) if e.is_transient() => debug!(error = %e, "Socket link not established"),
                Err(e) => warn!(error = %e, category = e.category(), "Socket link setup failed"),
            }
        }
        tokio::time::sleep(RECONNECT_PAUSE).await;
    }
}

async fn run_socket_events(inner: Arc<Inner>, mut events: mpsc::Receiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Frame(frame) => {
                inner.health.record_activity();
                inner.handle_socket_frame(&frame).await;
            }
            ChannelEvent::Closed { peer, error } => match error {
                TransportError::Timeout { .. } => {
                    warn!(%peer, "No traffic within the liveness window");
                    inner.health.mark_unreachable(inner.config.peer_cooldown());
                }
                other => {
                    debug!(%peer, error = %other, "Socket link lost");
                    inner.health.record_disconnect();
                }
            },
        }
    }
}

async fn run_mailbox_poller(inner: Arc<Inner>) {
    let idle = inner.config.mailbox_poll_interval();
    loop {
        match inner.mailbox.claim(&inner.config.node_id).await {
            Ok(Some(entry)) => {
                inner.process_mailbox_entry(entry).await;
                continue;
            }
            Ok(None) => {}
            Err(e) if e.is_lock_contention() => debug!("Mailbox lock busy; rescanning later"),
            Err(e) => warn!(error = %e, category = e.category(), "Mailbox claim failed"),
        }
        tokio::time::sleep(idle).await;
    }
}

async fn run_heartbeat(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        inner.send_heartbeat().await;
    }
}
