//! Bridge Configuration Module
//!
//! Loads the flat option set consumed by the bridge from an optional TOML file
//! layered over built-in defaults, with `BRIDGE_*` environment variables taking
//! precedence over both.
//!
//! ```toml
//! node_id = "analysis"
//! socket_address = "127.0.0.1:7878"
//! socket_role = "listen"
//! mailbox_root = "${HOME}/signal-bridge/mailbox"
//! heartbeat_interval_ms = 1000
//! ack_deadline_ms = 5000
//! lock_timeout_ms = 250
//! ```
//!
//! The camelCase spellings used by the terminal side (`socketAddress`,
//! `mailboxRoot`, `heartbeatIntervalMs`, ...) are accepted as well.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, ConfigError, Environment, File, Map, Source, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for overrides (`BRIDGE_ACK_DEADLINE_MS=...`)
pub const ENV_PREFIX: &str = "BRIDGE";

/// camelCase option names and the fields they map to
const KEY_ALIASES: &[(&str, &str)] = &[
    ("nodeId", "node_id"),
    ("socketAddress", "socket_address"),
    ("socketRole", "socket_role"),
    ("mailboxRoot", "mailbox_root"),
    ("heartbeatIntervalMs", "heartbeat_interval_ms"),
    ("ackDeadlineMs", "ack_deadline_ms"),
    ("lockTimeoutMs", "lock_timeout_ms"),
];

/// Which side of the TCP connection this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketRole {
    /// Dial `socket_address`
    Connect,
    /// Bind `socket_address` and accept the peer
    Listen,
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketRole::Connect => f.write_str("connect"),
            SocketRole::Listen => f.write_str("listen"),
        }
    }
}

/// Flat bridge configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Identity of this process; embedded in mailbox entry names
    #[serde(alias = "nodeId")]
    pub node_id: String,
    #[serde(alias = "socketAddress")]
    pub socket_address: String,
    #[serde(alias = "socketRole")]
    pub socket_role: SocketRole,
    #[serde(alias = "mailboxRoot")]
    pub mailbox_root: PathBuf,
    #[serde(alias = "heartbeatIntervalMs")]
    pub heartbeat_interval_ms: u64,
    #[serde(alias = "ackDeadlineMs")]
    pub ack_deadline_ms: u64,
    #[serde(alias = "lockTimeoutMs")]
    pub lock_timeout_ms: u64,

    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    /// Missed heartbeat intervals tolerated before the peer is unreachable
    pub heartbeat_grace: u32,
    pub peer_cooldown_ms: u64,
    pub mailbox_poll_ms: u64,
    pub lock_retry_limit: u32,
    pub lock_backoff_ms: u64,
    pub max_frame_bytes: usize,
    pub dedup_window: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_id: defaults::NODE_ID.to_string(),
            socket_address: defaults::SOCKET_ADDRESS.to_string(),
            socket_role: SocketRole::Connect,
            mailbox_root: PathBuf::from(defaults::MAILBOX_ROOT),
            heartbeat_interval_ms: defaults::HEARTBEAT_INTERVAL_MS,
            ack_deadline_ms: defaults::ACK_DEADLINE_MS,
            lock_timeout_ms: defaults::LOCK_TIMEOUT_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            io_timeout_ms: defaults::IO_TIMEOUT_MS,
            heartbeat_grace: defaults::HEARTBEAT_GRACE,
            peer_cooldown_ms: defaults::PEER_COOLDOWN_MS,
            mailbox_poll_ms: defaults::MAILBOX_POLL_MS,
            lock_retry_limit: defaults::LOCK_RETRY_LIMIT,
            lock_backoff_ms: defaults::LOCK_BACKOFF_MS,
            max_frame_bytes: defaults::MAX_FRAME_BYTES,
            dedup_window: defaults::DEDUP_WINDOW,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from an optional file with `BRIDGE_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix
    pub fn load_with_env_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&BridgeConfig::default()).context("Failed to seed default configuration")?,
        );

        if let Some(path) = path {
            info!("Loading bridge config: {:?}", path);
            builder = builder.add_source(CanonicalKeys(File::from(path).required(true)));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut bridge: BridgeConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        bridge.expand_env_vars()?;
        bridge.validate()?;

        debug!(?bridge, "Bridge configuration loaded");
        Ok(bridge)
    }

    /// Expand environment variables in the mailbox path
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let raw = self.mailbox_root.to_string_lossy().to_string();
        let expanded = shellexpand::full(&raw).context("Failed to expand mailbox_root path")?;
        self.mailbox_root = PathBuf::from(expanded.as_ref());
        Ok(())
    }

    /// Reject option combinations the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            bail!("node_id must not be empty");
        }
        if self
            .node_id
            .chars()
            .any(|c| c == '.' || c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
        {
            bail!(
                "node_id '{}' must not contain '.', path separators or whitespace",
                self.node_id
            );
        }

        match self.socket_address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => bail!(
                "socket_address '{}' must be in host:port form",
                self.socket_address
            ),
        }

        if self.mailbox_root.as_os_str().is_empty() {
            bail!("mailbox_root must not be empty");
        }

        for (name, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("ack_deadline_ms", self.ack_deadline_ms),
            ("lock_timeout_ms", self.lock_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("io_timeout_ms", self.io_timeout_ms),
            ("peer_cooldown_ms", self.peer_cooldown_ms),
            ("mailbox_poll_ms", self.mailbox_poll_ms),
            ("lock_backoff_ms", self.lock_backoff_ms),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }

        if self.heartbeat_grace == 0 {
            bail!("heartbeat_grace must be at least 1");
        }
        if self.lock_retry_limit == 0 {
            bail!("lock_retry_limit must be at least 1");
        }
        if self.max_frame_bytes < 64 {
            bail!("max_frame_bytes must be at least 64");
        }
        if self.dedup_window == 0 {
            bail!("dedup_window must be greater than zero");
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn ack_deadline(&self) -> Duration {
        Duration::from_millis(self.ack_deadline_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn peer_cooldown(&self) -> Duration {
        Duration::from_millis(self.peer_cooldown_ms)
    }

    pub fn mailbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mailbox_poll_ms)
    }

    pub fn lock_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_backoff_ms)
    }

    /// Silence window after which the peer counts as unreachable
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval() * self.heartbeat_grace
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    BridgeConfig::load(path)
}

/// Rewrites aliased option names to their field names
///
/// The defaults layer always carries the snake_case keys, so an aliased key
/// has to be renamed before merging or the two spellings would collide.
#[derive(Debug, Clone)]
struct CanonicalKeys<S>(S);

impl<S> Source for CanonicalKeys<S>
where
    S: Source + Clone + Send + Sync + 'static,
{
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> std::result::Result<Map<String, Value>, ConfigError> {
        Ok(self
            .0
            .collect()?
            .into_iter()
            .map(|(key, value)| (canonical_key(&key), value))
            .collect())
    }
}

fn canonical_key(key: &str) -> String {
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(key))
        .map_or_else(|| key.to_string(), |(_, field)| field.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.liveness_window(), Duration::from_millis(3000));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("bridge.toml");

        let config_content = r#"
node_id = "terminal"
socket_address = "10.0.0.5:9000"
socket_role = "listen"
mailbox_root = "/tmp/bridge-test/mailbox"
heartbeat_interval_ms = 200
ack_deadline_ms = 1500
lock_timeout_ms = 80
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = BridgeConfig::load_with_env_prefix(Some(&config_path), "BRIDGE_FILE_TEST").unwrap();

        assert_eq!(config.node_id, "terminal");
        assert_eq!(config.socket_address, "10.0.0.5:9000");
        assert_eq!(config.socket_role, SocketRole::Listen);
        assert_eq!(config.mailbox_root, PathBuf::from("/tmp/bridge-test/mailbox"));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(200));
        assert_eq!(config.ack_deadline(), Duration::from_millis(1500));
        assert_eq!(config.lock_timeout(), Duration::from_millis(80));
        // Unspecified options keep their defaults
        assert_eq!(config.heartbeat_grace, defaults::HEARTBEAT_GRACE);
        assert_eq!(config.dedup_window, defaults::DEDUP_WINDOW);
    }

    #[test]
    fn test_load_camel_case_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("bridge.toml");
        fs::write(
            &config_path,
            r#"
nodeId = "terminal"
socketAddress = "10.0.0.5:9100"
mailboxRoot = "/tmp/bridge-camel/mailbox"
heartbeatIntervalMs = 250
ackDeadlineMs = 4000
lockTimeoutMs = 120
"#,
        )
        .unwrap();

        let config = BridgeConfig::load_with_env_prefix(Some(&config_path), "BRIDGE_CAMEL_TEST").unwrap();

        assert_eq!(config.node_id, "terminal");
        assert_eq!(config.socket_address, "10.0.0.5:9100");
        assert_eq!(config.mailbox_root, PathBuf::from("/tmp/bridge-camel/mailbox"));
        assert_eq!(config.heartbeat_interval_ms, 250);
        assert_eq!(config.ack_deadline_ms, 4000);
        assert_eq!(config.lock_timeout_ms, 120);
    }

    #[test]
    fn test_camel_case_file_still_yields_to_environment() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("bridge.toml");
        fs::write(&config_path, "ackDeadlineMs = 4000\n").unwrap();
        std::env::set_var("BRIDGE_CAMEL_ENV_TEST_ACK_DEADLINE_MS", "900");

        let config =
            BridgeConfig::load_with_env_prefix(Some(&config_path), "BRIDGE_CAMEL_ENV_TEST").unwrap();
        assert_eq!(config.ack_deadline_ms, 900);

        std::env::remove_var("BRIDGE_CAMEL_ENV_TEST_ACK_DEADLINE_MS");
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("socketAddress"), "socket_address");
        assert_eq!(canonical_key("socketaddress"), "socket_address");
        assert_eq!(canonical_key("dedup_window"), "dedup_window");
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("BRIDGE_ENV_TEST_ACK_DEADLINE_MS", "750");
        std::env::set_var("BRIDGE_ENV_TEST_NODE_ID", "overridden");

        let config = BridgeConfig::load_with_env_prefix(None, "BRIDGE_ENV_TEST").unwrap();
        assert_eq!(config.ack_deadline_ms, 750);
        assert_eq!(config.node_id, "overridden");

        std::env::remove_var("BRIDGE_ENV_TEST_ACK_DEADLINE_MS");
        std::env::remove_var("BRIDGE_ENV_TEST_NODE_ID");
    }

    #[test]
    fn test_mailbox_root_expansion() {
        std::env::set_var("BRIDGE_EXPAND_TEST_DIR", "/var/tmp/expanded");
        let mut config = BridgeConfig {
            mailbox_root: PathBuf::from("${BRIDGE_EXPAND_TEST_DIR}/mailbox"),
            ..Default::default()
        };
        config.expand_env_vars().unwrap();
        assert_eq!(config.mailbox_root, PathBuf::from("/var/tmp/expanded/mailbox"));
        std::env::remove_var("BRIDGE_EXPAND_TEST_DIR");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            BridgeConfig { node_id: String::new(), ..Default::default() },
            BridgeConfig { node_id: "a.b".to_string(), ..Default::default() },
            BridgeConfig { socket_address: "nohost".to_string(), ..Default::default() },
            BridgeConfig { socket_address: "host:notaport".to_string(), ..Default::default() },
            BridgeConfig { heartbeat_interval_ms: 0, ..Default::default() },
            BridgeConfig { ack_deadline_ms: 0, ..Default::default() },
            BridgeConfig { lock_timeout_ms: 0, ..Default::default() },
            BridgeConfig { heartbeat_grace: 0, ..Default::default() },
            BridgeConfig { lock_retry_limit: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "accepted {:?}", config);
        }
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("bridge.toml");
        fs::write(&config_path, "heartbeat_interval_ms = \"soon\"\n").unwrap();

        assert!(BridgeConfig::load_with_env_prefix(Some(&config_path), "BRIDGE_BAD_TEST").is_err());
    }
}
