//! End-to-end bridge scenarios over loopback TCP and a temp mailbox
//!
//! Each test builds two coordinators sharing one mailbox root: `analysis`
//! (signal producer) and `terminal` (signal consumer).

use async_trait::async_trait;
use bridge::{
    DeliveryCoordinator, DeliveryStatus, FailureReason, HandlerError, HandlerOutcome,
    MessageHandler, PeerState, Route, SessionError,
};
use bridge_config::{BridgeConfig, SocketRole};
use codec::{
    encode, system_timestamp_ns, Direction, HeartbeatPayload, Message, MessageType, Payload,
    SignalPayload, StatusMap,
};
use mailbox::Bucket;
use network::{read_frame, write_frame, ConnectionState, TransportError};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(node_id: &str, role: SocketRole, address: String, root: &Path) -> BridgeConfig {
    BridgeConfig {
        node_id: node_id.to_string(),
        socket_address: address,
        socket_role: role,
        mailbox_root: root.to_path_buf(),
        heartbeat_interval_ms: 100,
        ack_deadline_ms: 2_000,
        lock_timeout_ms: 250,
        connect_timeout_ms: 200,
        io_timeout_ms: 500,
        heartbeat_grace: 5,
        peer_cooldown_ms: 1_000,
        mailbox_poll_ms: 10,
        ..BridgeConfig::default()
    }
}

/// A loopback address with nothing listening on it
fn dead_address() -> String {
    let placeholder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = placeholder.local_addr().unwrap();
    drop(placeholder);
    address.to_string()
}

fn eurusd() -> SignalPayload {
    SignalPayload::market("EURUSD", Direction::Buy, dec!(0.01))
}

/// Records handled signal sequence ids
#[derive(Default)]
struct SignalLog {
    seen: Mutex<Vec<u64>>,
}

impl SignalLog {
    fn seen(&self) -> Vec<u64> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for SignalLog {
    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        match message.payload() {
            Payload::Signal(signal) if signal.instrument == "EURUSD" => {
                self.seen.lock().push(message.sequence_id());
                Ok(HandlerOutcome::Processed)
            }
            _ => Err(HandlerError::rejected("unexpected payload")),
        }
    }
}

struct AccountStatus;

#[async_trait]
impl MessageHandler for AccountStatus {
    async fn handle(&self, _message: &Message) -> Result<HandlerOutcome, HandlerError> {
        let mut status = StatusMap::new();
        status.insert("terminal.account".to_string(), "demo-1".to_string());
        Ok(HandlerOutcome::Status(status))
    }
}

async fn wait_until(what: &str, timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Terminal listens, analysis dials it
async fn socket_pair(
    root: &TempDir,
    log: Arc<SignalLog>,
) -> (DeliveryCoordinator, DeliveryCoordinator) {
    let terminal = DeliveryCoordinator::new(config(
        "terminal",
        SocketRole::Listen,
        "127.0.0.1:0".to_string(),
        root.path(),
    ))
    .await
    .unwrap();
    terminal.register_handler(MessageType::Signal, log);
    terminal.register_handler(MessageType::StatusRequest, Arc::new(AccountStatus));
    terminal.start().await.unwrap();

    let address = terminal.local_addr().unwrap().to_string();
    let analysis = DeliveryCoordinator::new(config("analysis", SocketRole::Connect, address, root.path()))
        .await
        .unwrap();
    analysis.start().await.unwrap();

    // Connected is not enough: each side must have heard from the other
    wait_until("socket link", Duration::from_secs(5), || {
        analysis.socket_state() == ConnectionState::Connected
            && terminal.socket_state() == ConnectionState::Connected
            && analysis.peer_reachable()
            && terminal.peer_reachable()
    })
    .await;

    (analysis, terminal)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_happy_path_over_socket() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let log = Arc::new(SignalLog::default());
    let (analysis, terminal) = socket_pair(&root, log.clone()).await;

    let started = Instant::now();
    let handle = analysis.submit_signal(eurusd()).await.unwrap();
    let status = handle.wait().await;

    assert_eq!(status, DeliveryStatus::Confirmed(Route::Socket));
    assert!(started.elapsed() < analysis.config().heartbeat_interval() * 5);
    assert_eq!(log.seen(), vec![handle.sequence_id()]);

    // Nothing touched the mailbox
    for bucket in Bucket::ALL {
        assert_eq!(analysis.mailbox().count(bucket).await.unwrap(), 0, "{} not empty", bucket);
    }
    assert_eq!(analysis.stats().socket_sends, 1);
    assert_eq!(analysis.stats().mailbox_deposits, 0);
    assert_eq!(terminal.stats().inbound_mailbox, 0);
    assert_eq!(terminal.stats().duplicates_dropped, 0);

    analysis.shutdown().await;
    terminal.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fallback_over_mailbox_in_both_directions() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();

    // Neither side can reach the other over the socket
    let analysis_log = Arc::new(SignalLog::default());
    let terminal_log = Arc::new(SignalLog::default());
    let analysis = DeliveryCoordinator::new(config(
        "analysis",
        SocketRole::Connect,
        dead_address(),
        root.path(),
    ))
    .await
    .unwrap();
    let terminal = DeliveryCoordinator::new(config(
        "terminal",
        SocketRole::Connect,
        dead_address(),
        root.path(),
    ))
    .await
    .unwrap();
    analysis.register_handler(MessageType::Signal, analysis_log.clone());
    terminal.register_handler(MessageType::Signal, terminal_log.clone());
    analysis.start().await.unwrap();
    terminal.start().await.unwrap();

    let outbound = analysis.submit_signal(eurusd()).await.unwrap();
    let inbound = terminal.submit_signal(eurusd()).await.unwrap();

    assert_eq!(outbound.wait().await, DeliveryStatus::Confirmed(Route::Mailbox));
    assert_eq!(inbound.wait().await, DeliveryStatus::Confirmed(Route::Mailbox));
    assert_eq!(terminal_log.seen(), vec![outbound.sequence_id()]);
    assert_eq!(analysis_log.seen(), vec![inbound.sequence_id()]);

    // Two signals and two confirmations, all archived as confirmed
    let mailbox = analysis.mailbox();
    wait_until("confirmations archived", Duration::from_secs(5), || {
        bucket_len(mailbox, Bucket::Confirmed) == 4
    })
    .await;
    assert_eq!(mailbox.count(Bucket::Incoming).await.unwrap(), 0);
    assert_eq!(mailbox.count(Bucket::Failed).await.unwrap(), 0);
    assert_eq!(analysis.stats().socket_sends, 0);

    analysis.shutdown().await;
    terminal.shutdown().await;
}

/// Synchronous bucket count for polling predicates
fn bucket_len(mailbox: &mailbox::Mailbox, bucket: Bucket) -> usize {
    std::fs::read_dir(mailbox.root().join(bucket.dir_name()))
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().ends_with(".msg"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_corrupted_fallback_entry_fails_both_sides() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();

    let mut analysis_config = config("analysis", SocketRole::Connect, dead_address(), root.path());
    analysis_config.ack_deadline_ms = 600;
    let analysis = DeliveryCoordinator::new(analysis_config).await.unwrap();
    analysis.start().await.unwrap();

    let log = Arc::new(SignalLog::default());
    let terminal = DeliveryCoordinator::new(config(
        "terminal",
        SocketRole::Connect,
        dead_address(),
        root.path(),
    ))
    .await
    .unwrap();
    terminal.register_handler(MessageType::Signal, log.clone());

    let started = Instant::now();
    let handle = analysis.submit_signal(eurusd()).await.unwrap();

    // Simulate a writer crash: cut the entry in half before the terminal runs
    let entries = analysis.mailbox().list(Bucket::Incoming).await.unwrap();
    assert_eq!(entries.len(), 1);
    let path = root.path().join("incoming").join(entries[0].file_name());
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    terminal.start().await.unwrap();

    wait_until("entry failed", Duration::from_secs(5), || {
        bucket_len(terminal.mailbox(), Bucket::Failed) == 1
    })
    .await;
    let reason = terminal.mailbox().failure_reason(&entries[0]).await.unwrap().unwrap();
    assert!(reason.contains("decode failed"), "reason was {:?}", reason);
    assert!(log.seen().is_empty());
    assert_eq!(terminal.stats().decode_failures, 1);

    assert_eq!(handle.wait().await, DeliveryStatus::Failed(FailureReason::Unacknowledged));
    assert!(started.elapsed() >= Duration::from_millis(600));

    analysis.shutdown().await;
    terminal.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_message_uses_exactly_one_transport() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let log = Arc::new(SignalLog::default());
    let (analysis, terminal) = socket_pair(&root, log.clone()).await;

    let mut socket_handles = Vec::new();
    for _ in 0..10 {
        socket_handles.push(analysis.submit_signal(eurusd()).await.unwrap());
    }
    for handle in &socket_handles {
        assert_eq!(handle.wait().await, DeliveryStatus::Confirmed(Route::Socket));
    }
    assert_eq!(analysis.mailbox().count(Bucket::Incoming).await.unwrap(), 0);
    assert_eq!(analysis.mailbox().count(Bucket::Confirmed).await.unwrap(), 0);

    // Peer goes away; the next messages can only use the mailbox
    terminal.shutdown().await;
    wait_until("socket teardown", Duration::from_secs(5), || {
        analysis.socket_state() != ConnectionState::Connected
    })
    .await;

    let mut mailbox_handles = Vec::new();
    for _ in 0..5 {
        mailbox_handles.push(analysis.submit_signal(eurusd()).await.unwrap());
    }
    assert_eq!(analysis.mailbox().count(Bucket::Incoming).await.unwrap(), 5);

    let stats = analysis.stats();
    assert_eq!(stats.socket_sends, 10);
    assert_eq!(stats.mailbox_deposits, 5);

    // Every signal reached the terminal handler at most once
    let mut seen = log.seen();
    seen.sort_unstable();
    let mut expected: Vec<u64> = socket_handles.iter().map(|h| h.sequence_id()).collect();
    expected.sort_unstable();
    assert_eq!(seen, expected);

    // Unconfirmed mailbox deliveries expire instead of staying pending
    for handle in &mailbox_handles {
        assert_eq!(handle.wait().await, DeliveryStatus::Failed(FailureReason::Unacknowledged));
    }
    assert_eq!(analysis.pending_deliveries(), 0);

    analysis.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_request_round_trip() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let (analysis, terminal) = socket_pair(&root, Arc::new(SignalLog::default())).await;

    let status = analysis.request_status(Vec::new()).await.unwrap();
    assert_eq!(status["bridge.node_id"], "terminal");
    assert_eq!(status["bridge.socket_state"], "connected");
    assert_eq!(status["terminal.account"], "demo-1");
    assert!(status.contains_key("bridge.lock_mode"));
    assert!(status.contains_key("bridge.pending_deliveries"));
    assert!(status.contains_key("bridge.peer_idle_ms"));
    assert_ne!(status["bridge.socket_frames_received"], "0");

    let filtered = analysis
        .request_status(vec!["terminal.account".to_string(), "no.such.field".to_string()])
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered["terminal.account"], "demo-1");

    analysis.shutdown().await;
    terminal.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_request_deadline_is_enforced() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();

    let mut analysis_config = config("analysis", SocketRole::Connect, dead_address(), root.path());
    analysis_config.ack_deadline_ms = 300;
    let analysis = DeliveryCoordinator::new(analysis_config).await.unwrap();
    analysis.start().await.unwrap();

    // Nobody answers: the request sits in the mailbox
    let started = Instant::now();
    let result = analysis.request_status(Vec::new()).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(SessionError::StatusTimeout { timeout_ms: 300 })));
    assert!(elapsed >= Duration::from_millis(300), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3));
    assert_eq!(analysis.mailbox().count(Bucket::Incoming).await.unwrap(), 1);

    analysis.shutdown().await;
}

/// Accept one connection from the coordinator under test
async fn accept_raw(listener: &TcpListener) -> TcpStream {
    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("coordinator dialed within deadline")
        .unwrap();
    stream
}

/// Write a few well-formed heartbeats, the way a live peer would
async fn send_heartbeats(stream: &mut TcpStream, count: u64) {
    for sequence_id in 1..=count {
        let heartbeat = Message::new(
            sequence_id,
            system_timestamp_ns(),
            HeartbeatPayload { interval_ms: 100 },
        )
        .unwrap();
        write_frame(stream, &encode(&heartbeat)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connected_but_unverified_dialer_uses_mailbox() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let log = Arc::new(SignalLog::default());

    let mut terminal_config = config("terminal", SocketRole::Listen, "127.0.0.1:0".to_string(), root.path());
    terminal_config.heartbeat_grace = 2;
    terminal_config.peer_cooldown_ms = 3_000;
    let terminal = DeliveryCoordinator::new(terminal_config).await.unwrap();
    terminal.register_handler(MessageType::Signal, log.clone());
    terminal.start().await.unwrap();
    let address = terminal.local_addr().unwrap();

    // A client that connects and never speaks sends the terminal into cooldown
    let _silent = TcpStream::connect(address).await.unwrap();
    wait_until("terminal cooldown", Duration::from_secs(5), || {
        matches!(terminal.peer_state(), PeerState::Unreachable { .. })
    })
    .await;

    let mut analysis_config = config("analysis", SocketRole::Connect, address.to_string(), root.path());
    analysis_config.heartbeat_grace = 2;
    analysis_config.ack_deadline_ms = 1_000;
    let analysis = DeliveryCoordinator::new(analysis_config).await.unwrap();
    analysis.start().await.unwrap();
    // Give the dialer time to reach the cooling listener
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!analysis.peer_reachable());

    let handle = analysis.submit_signal(eurusd()).await.unwrap();
    assert_eq!(handle.wait().await, DeliveryStatus::Confirmed(Route::Mailbox));
    assert_eq!(analysis.stats().socket_sends, 0);
    assert_eq!(log.seen(), vec![handle.sequence_id()]);

    // After the cooldown the link is verified and nothing is replayed
    wait_until("link after cooldown", Duration::from_secs(10), || {
        analysis.peer_reachable() && terminal.peer_reachable()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log.seen(), vec![handle.sequence_id()]);
    assert_eq!(terminal.stats().duplicates_dropped, 0);

    analysis.shutdown().await;
    terminal.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_peer_routes_to_mailbox_during_cooldown() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let mut analysis_config = config("analysis", SocketRole::Connect, address, root.path());
    analysis_config.heartbeat_grace = 2;
    analysis_config.peer_cooldown_ms = 3_000;
    let analysis = DeliveryCoordinator::new(analysis_config).await.unwrap();
    analysis.start().await.unwrap();

    let mut peer = accept_raw(&listener).await;
    send_heartbeats(&mut peer, 3).await;
    wait_until("peer reachable", Duration::from_secs(5), || analysis.peer_reachable()).await;

    // Heartbeats stop; two missed intervals mark the peer unreachable
    wait_until("peer unreachable", Duration::from_secs(5), || {
        matches!(analysis.peer_state(), PeerState::Unreachable { .. })
    })
    .await;
    assert_ne!(analysis.socket_state(), ConnectionState::Connected);

    let handle = analysis.submit_signal(eurusd()).await.unwrap();
    assert!(handle.sequence_id() > 0);
    assert_eq!(analysis.stats().mailbox_deposits, 1);
    assert_eq!(analysis.stats().socket_sends, 0);
    assert_eq!(analysis.mailbox().count(Bucket::Incoming).await.unwrap(), 1);

    // No redial while the cooldown lasts
    assert!(tokio::time::timeout(Duration::from_millis(500), listener.accept())
        .await
        .is_err());

    analysis.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_undecodable_socket_frame_resets_connection() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let analysis = DeliveryCoordinator::new(config("analysis", SocketRole::Connect, address, root.path()))
        .await
        .unwrap();
    analysis.start().await.unwrap();

    let mut peer = accept_raw(&listener).await;
    send_heartbeats(&mut peer, 3).await;
    wait_until("peer reachable", Duration::from_secs(5), || analysis.peer_reachable()).await;

    write_frame(&mut peer, b"definitely not a bridge message").await.unwrap();
    wait_until("decode failure", Duration::from_secs(5), || {
        analysis.stats().decode_failures == 1
    })
    .await;

    // The coordinator hangs up; drain its heartbeats until the close
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match read_frame(&mut peer, 1024 * 1024).await {
                Ok(_) => continue,
                Err(e) => break e,
            }
        }
    })
    .await
    .expect("connection closed within deadline");
    assert!(
        matches!(closed, TransportError::Closed | TransportError::Io { .. }),
        "unexpected read error {:?}",
        closed
    );

    // A decode failure is not a liveness failure: the coordinator redials at once
    assert!(!matches!(analysis.peer_state(), PeerState::Unreachable { .. }));
    let _second = accept_raw(&listener).await;

    analysis.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let coordinator = DeliveryCoordinator::new(config(
        "analysis",
        SocketRole::Connect,
        dead_address(),
        root.path(),
    ))
    .await
    .unwrap();
    coordinator.start().await.unwrap();
    coordinator.shutdown().await;

    assert!(coordinator.submit_signal(eurusd()).await.is_err());
    assert!(matches!(
        coordinator.request_status(Vec::new()).await,
        Err(SessionError::ShutDown)
    ));
}

#[tokio::test]
async fn test_invalid_configuration_rejected() {
    let root = tempfile::tempdir().unwrap();
    let bad = config("a.b", SocketRole::Connect, dead_address(), root.path());
    assert!(DeliveryCoordinator::new(bad).await.is_err());
}
