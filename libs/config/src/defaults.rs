//! Default configuration values
//!
//! Used by [`BridgeConfig::default`](crate::BridgeConfig) and as the base layer
//! beneath configuration files and environment overrides.

/// Process identity used when none is configured
pub const NODE_ID: &str = "bridge";

/// Loopback endpoint shared by both sides by default
pub const SOCKET_ADDRESS: &str = "127.0.0.1:7878";

/// Shared directory both processes can reach
pub const MAILBOX_ROOT: &str = "/tmp/signal-bridge/mailbox";

/// Heartbeat cadence (milliseconds)
pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// How long a sender waits for a Confirmation (milliseconds)
pub const ACK_DEADLINE_MS: u64 = 5_000;

/// Mailbox lock acquisition budget (milliseconds)
pub const LOCK_TIMEOUT_MS: u64 = 250;

/// Link timeouts
pub const CONNECT_TIMEOUT_MS: u64 = 500;
pub const IO_TIMEOUT_MS: u64 = 500;

/// Missed heartbeat intervals before the peer is declared unreachable
pub const HEARTBEAT_GRACE: u32 = 3;

/// Socket silence after the peer is declared unreachable (milliseconds)
pub const PEER_COOLDOWN_MS: u64 = 5_000;

/// Mailbox scan cadence (milliseconds)
pub const MAILBOX_POLL_MS: u64 = 50;

/// Mailbox lock contention handling
pub const LOCK_RETRY_LIMIT: u32 = 3;
pub const LOCK_BACKOFF_MS: u64 = 25;

/// Largest accepted socket frame (bytes)
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Remembered sequence ids per origin for duplicate suppression
pub const DEDUP_WINDOW: usize = 4_096;
