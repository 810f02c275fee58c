//! # Signal Bridge Configuration
//!
//! Option set, defaults and loading for the bridge.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bridge_config::BridgeConfig;
//! use std::path::Path;
//!
//! let config = BridgeConfig::load(Some(Path::new("bridge.toml")))?;
//! println!("heartbeat every {:?}", config.heartbeat_interval());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Every option can be overridden with a `BRIDGE_` environment variable named
//! after the upper-cased key, e.g. `BRIDGE_LOCK_TIMEOUT_MS=500`.

pub mod bridge_config;
pub mod defaults;

pub use bridge_config::{load_config, BridgeConfig, SocketRole, ENV_PREFIX};
