//! Framed TCP Socket Channel
//!
//! One duplex connection to a single peer. The read half is owned by a reader
//! task that forwards frames as [`ChannelEvent`]s; the write half sits behind an
//! async mutex so concurrent senders never interleave frames.
//!
//! Sends are only attempted in [`ConnectionState::Connected`]. Any read or write
//! failure, including a timeout, tears the connection down; callers establish a
//! fresh one instead of retrying on the same socket.

use crate::error::{Result, TransportError};
use crate::frame::{read_frame, write_frame};
use crate::stats::{ChannelStats, StatsTracker};
use bytes::Bytes;
use parking_lot::RwLock;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the connection this channel plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    /// Dial the configured address
    Connect,
    /// Bind the configured address and accept the peer
    Listen,
}

/// Socket channel configuration
#[derive(Debug, Clone)]
pub struct SocketChannelConfig {
    /// `host:port` to dial or bind
    pub address: String,
    pub role: SocketRole,
    /// Bound on dialing, and on each accept wait in listen mode
    pub connect_timeout: Duration,
    /// Bound on writing one frame
    pub io_timeout: Duration,
    /// Silence after which the connection is considered dead
    pub read_idle_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl SocketChannelConfig {
    pub fn new(address: impl Into<String>, role: SocketRole) -> Self {
        Self {
            address: address.into(),
            role,
            connect_timeout: Duration::from_millis(500),
            io_timeout: Duration::from_millis(500),
            read_idle_timeout: Duration::from_secs(3),
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// Inbound notifications produced by the reader task
#[derive(Debug)]
pub enum ChannelEvent {
    /// One complete frame from the peer
    Frame(Bytes),
    /// The connection was torn down by the reader
    Closed {
        peer: SocketAddr,
        error: TransportError,
    },
}

struct Link {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
    peer_addr: SocketAddr,
    generation: u64,
}

struct Shared {
    config: SocketChannelConfig,
    state: RwLock<ConnectionState>,
    peer_addr: RwLock<Option<SocketAddr>>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    stats: StatsTracker,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "Socket state transition");
        }
    }

    /// Tear down the link if it still belongs to `generation`
    async fn teardown(&self, generation: u64, abort_reader: bool) -> bool {
        let mut guard = self.link.lock().await;
        if guard.as_ref().map(|link| link.generation) != Some(generation) {
            return false;
        }
        let Some(mut link) = guard.take() else {
            return false;
        };
        drop(guard);

        if abort_reader {
            link.reader.abort();
        }
        if let Ok(Err(e)) = tokio::time::timeout(self.config.io_timeout, link.writer.shutdown()).await {
            debug!(peer = %link.peer_addr, "Error shutting down socket: {}", e);
        }

        *self.peer_addr.write() = None;
        self.set_state(ConnectionState::Disconnected);
        self.stats.record_disconnect();
        info!(peer = %link.peer_addr, "Socket connection closed");
        true
    }
}

/// Framed duplex socket to one peer
pub struct SocketChannel {
    shared: Arc<Shared>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl SocketChannel {
    pub fn new(config: SocketChannelConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                peer_addr: RwLock::new(None),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                stats: StatsTracker::default(),
            }),
            listener: Mutex::new(None),
            local_addr: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &SocketChannelConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.shared.peer_addr.read()
    }

    /// Address the listener is bound to (listen role, after [`bind`](Self::bind))
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.stats.snapshot()
    }

    /// Bind the listener; idempotent. Only valid for [`SocketRole::Listen`].
    pub async fn bind(&self) -> Result<SocketAddr> {
        if self.shared.config.role != SocketRole::Listen {
            return Err(TransportError::configuration(
                "bind requires the listen role",
                Some("socket_role"),
            ));
        }

        let mut guard = self.listener.lock().await;
        if let Some(listener) = guard.as_ref() {
            return listener
                .local_addr()
                .map_err(|e| TransportError::io("Failed to read listener address", e));
        }

        let address = &self.shared.config.address;
        let listener = TcpListener::bind(address.as_str()).await.map_err(|e| {
            TransportError::connection_with_source(format!("Failed to bind {}", address), None, e)
        })?;
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::io("Failed to read listener address", e))?;

        info!("Socket listening on {}", local);
        *self.local_addr.write() = Some(local);
        *guard = Some(listener);
        Ok(local)
    }

    /// Dial or accept one connection and start its reader task
    ///
    /// A successful accept replaces any existing connection. Frames and the
    /// eventual close notification are delivered to `events`.
    pub async fn establish(&self, events: mpsc::Sender<ChannelEvent>) -> Result<SocketAddr> {
        let was_connected = {
            let mut state = self.shared.state.write();
            let connected = *state == ConnectionState::Connected;
            if !connected {
                *state = ConnectionState::Connecting;
            }
            connected
        };

        let attempt = match self.shared.config.role {
            SocketRole::Connect => self.dial().await,
            SocketRole::Listen => self.accept().await,
        };

        match attempt {
            Ok((stream, peer_addr)) => {
                self.install(stream, peer_addr, events).await;
                Ok(peer_addr)
            }
            Err(e) => {
                if !was_connected {
                    self.shared.set_state(ConnectionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn dial(&self) -> Result<(TcpStream, SocketAddr)> {
        let config = &self.shared.config;
        debug!("Connecting to socket peer at {}", config.address);

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.address.as_str()),
        )
        .await
        .map_err(|_| TransportError::timeout("socket connect", config.connect_timeout.as_millis() as u64))?
        .map_err(|e| {
            TransportError::connection_with_source(
                format!("Failed to connect to {}", config.address),
                None,
                e,
            )
        })?;

        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TransportError::io("Failed to get peer address", e))?;
        Ok((stream, peer_addr))
    }

    async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        self.bind().await?;
        let timeout = self.shared.config.connect_timeout;

        let guard = self.listener.lock().await;
        let listener = guard
            .as_ref()
            .ok_or_else(|| TransportError::configuration("listener not bound", Some("socket_address")))?;

        tokio::time::timeout(timeout, listener.accept())
            .await
            .map_err(|_| TransportError::timeout("socket accept", timeout.as_millis() as u64))?
            .map_err(|e| TransportError::connection_with_source("Failed to accept connection", None, e))
    }

    /// Accept one pending connection and close it without reading from it
    ///
    /// Lets a listener that is not ready for its peer refuse a dialer instead of
    /// leaving it queued in the kernel backlog. Returns the refused peer, or
    /// `None` when nobody dialed within the connect timeout. The current
    /// connection, if any, is left alone.
    pub async fn turn_away(&self) -> Result<Option<SocketAddr>> {
        let accepted = match self.accept().await {
            Ok(accepted) => accepted,
            Err(TransportError::Timeout { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let (mut stream, peer_addr) = accepted;

        if let Ok(Err(e)) = tokio::time::timeout(self.shared.config.io_timeout, stream.shutdown()).await {
            debug!(peer = %peer_addr, "Error shutting down refused socket: {}", e);
        }
        drop(stream);
        info!(peer = %peer_addr, "Turned away socket peer");
        Ok(Some(peer_addr))
    }

    async fn install(&self, stream: TcpStream, peer_addr: SocketAddr, events: mpsc::Sender<ChannelEvent>) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        let (read_half, write_half) = stream.into_split();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // The reader cannot tear down before the link is in place: it needs this lock
        let mut guard = self.shared.link.lock().await;
        let reader = tokio::spawn(read_loop(
            self.shared.clone(),
            read_half,
            peer_addr,
            generation,
            events,
        ));
        let previous = guard.replace(Link {
            writer: write_half,
            reader,
            peer_addr,
            generation,
        });
        *self.shared.peer_addr.write() = Some(peer_addr);
        self.shared.set_state(ConnectionState::Connected);
        drop(guard);

        if let Some(mut old) = previous {
            info!(old = %old.peer_addr, new = %peer_addr, "Replacing socket connection");
            old.reader.abort();
            let _ = tokio::time::timeout(self.shared.config.io_timeout, old.writer.shutdown()).await;
            self.shared.stats.record_disconnect();
        }

        self.shared.stats.record_connect();
        info!("Socket connected to {}", peer_addr);
    }

    /// Send one frame, bounded by the I/O timeout
    ///
    /// Returns [`TransportError::NotConnected`] immediately when no connection
    /// is up. On failure the connection is torn down.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let config = &self.shared.config;
        if frame.len() > config.max_frame_bytes {
            return Err(TransportError::frame_too_large(frame.len(), config.max_frame_bytes));
        }

        let io_timeout_ms = config.io_timeout.as_millis() as u64;
        let outcome = tokio::time::timeout(config.io_timeout, async {
            let mut guard = self.shared.link.lock().await;
            let link = guard.as_mut().ok_or(TransportError::NotConnected)?;
            let generation = link.generation;
            let result = write_frame(&mut link.writer, frame).await;
            Ok::<_, TransportError>((generation, link.peer_addr, result))
        })
        .await;

        match outcome {
            Ok(Ok((_, peer, Ok(())))) => {
                self.shared.stats.record_send(frame.len());
                debug!(peer = %peer, bytes = frame.len(), "Sent frame");
                Ok(())
            }
            Ok(Ok((generation, peer, Err(e)))) => {
                warn!(peer = %peer, error = %e, "Socket send failed; tearing down connection");
                self.shared.teardown(generation, true).await;
                Err(e)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("Socket send timed out after {}ms; tearing down connection", io_timeout_ms);
                let generation = self.shared.generation.load(Ordering::SeqCst);
                self.shared.teardown(generation, true).await;
                Err(TransportError::timeout("socket send", io_timeout_ms))
            }
        }
    }

    /// Drop the current connection, if any
    pub async fn disconnect(&self) -> bool {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.teardown(generation, true).await
    }

    /// Drop the connection and release the listener
    pub async fn close(&self) {
        self.disconnect().await;
        if self.listener.lock().await.take().is_some() {
            *self.local_addr.write() = None;
            debug!("Socket listener closed");
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut reader: OwnedReadHalf,
    peer: SocketAddr,
    generation: u64,
    events: mpsc::Sender<ChannelEvent>,
) {
    let idle = shared.config.read_idle_timeout;
    let max_frame_bytes = shared.config.max_frame_bytes;

    let error = loop {
        match tokio::time::timeout(idle, read_frame(&mut reader, max_frame_bytes)).await {
            Ok(Ok(frame)) => {
                shared.stats.record_receive(frame.len());
                debug!(peer = %peer, bytes = frame.len(), "Received frame");
                if events.send(ChannelEvent::Frame(frame)).await.is_err() {
                    debug!("Channel event receiver dropped; stopping reader");
                    return;
                }
            }
            Ok(Err(e)) => break e,
            Err(_) => break TransportError::timeout("socket read", idle.as_millis() as u64),
        }
    };

    match &error {
        TransportError::Closed => info!(peer = %peer, "Socket peer closed the connection"),
        other => warn!(
            peer = %peer,
            error = %other,
            category = other.category(),
            "Socket read failed; tearing down connection"
        ),
    }

    if shared.teardown(generation, false).await {
        let _ = events.send(ChannelEvent::Closed { peer, error }).await;
    }
}

impl fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketChannel")
            .field("address", &self.shared.config.address)
            .field("role", &self.shared.config.role)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listen_config() -> SocketChannelConfig {
        SocketChannelConfig::new("127.0.0.1:0", SocketRole::Listen)
    }

    #[tokio::test]
    async fn test_send_without_connection_is_rejected() {
        let channel = SocketChannel::new(SocketChannelConfig::new("127.0.0.1:1", SocketRole::Connect));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(matches!(channel.send(b"hello").await, Err(TransportError::NotConnected)));
        assert_eq!(channel.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_bind_requires_listen_role() {
        let channel = SocketChannel::new(SocketChannelConfig::new("127.0.0.1:0", SocketRole::Connect));
        assert!(matches!(channel.bind().await, Err(TransportError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_bind_is_idempotent() {
        let channel = SocketChannel::new(listen_config());
        let first = channel.bind().await.unwrap();
        let second = channel.bind().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(channel.local_addr(), Some(first));
        assert_ne!(first.port(), 0);
    }

    #[tokio::test]
    async fn test_accept_times_out_without_peer() {
        let mut config = listen_config();
        config.connect_timeout = Duration::from_millis(20);
        let channel = SocketChannel::new(config);
        let (tx, _rx) = mpsc::channel(4);

        assert!(matches!(channel.establish(tx).await, Err(TransportError::Timeout { .. })));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_oversized_send_rejected_before_write() {
        let mut config = listen_config();
        config.max_frame_bytes = 8;
        let listener = SocketChannel::new(config);
        let address = listener.bind().await.unwrap();

        let mut dial_config = SocketChannelConfig::new(address.to_string(), SocketRole::Connect);
        dial_config.max_frame_bytes = 8;
        let dialer = SocketChannel::new(dial_config);

        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);
        let (accepted, dialed) = tokio::join!(listener.establish(tx_a), dialer.establish(tx_b));
        accepted.unwrap();
        dialed.unwrap();

        assert!(matches!(
            dialer.send(&[0u8; 9]).await,
            Err(TransportError::FrameTooLarge { size: 9, limit: 8 })
        ));
        // Rejection happens before any bytes move, so the link stays up
        assert!(dialer.is_connected());
    }

    #[tokio::test]
    async fn test_turn_away_closes_dialer_without_connecting() {
        let mut config = listen_config();
        config.connect_timeout = Duration::from_secs(2);
        let listener = SocketChannel::new(config);
        let address = listener.bind().await.unwrap();

        let dialer = SocketChannel::new(SocketChannelConfig::new(address.to_string(), SocketRole::Connect));
        let (tx, mut rx) = mpsc::channel(4);
        let (refused, dialed) = tokio::join!(listener.turn_away(), dialer.establish(tx));

        assert!(refused.unwrap().is_some());
        assert_eq!(dialed.unwrap(), address);
        assert_eq!(listener.state(), ConnectionState::Disconnected);
        assert_eq!(listener.stats().connects, 0);

        // The dialer's reader sees the close straight away
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(event, Some(ChannelEvent::Closed { error: TransportError::Closed, .. })));
        assert_eq!(dialer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_turn_away_without_dialer_returns_none() {
        let mut config = listen_config();
        config.connect_timeout = Duration::from_millis(20);
        let listener = SocketChannel::new(config);
        assert_eq!(listener.turn_away().await.unwrap(), None);
    }
}
