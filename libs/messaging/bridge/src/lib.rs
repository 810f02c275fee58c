//! # Signal Bridge
//!
//! Delivery coordination and session protocol between two cooperating
//! processes: a signal producer and a trading terminal.
//!
//! ## Architecture Role
//!
//! ```text
//!   producer ── submit ──► DeliveryCoordinator ══ socket ══► DeliveryCoordinator ── handler ──► consumer
//!                               ║                                   ║
//!                               ╚═══════ mailbox directory ═════════╝
//! ```
//!
//! The socket is the primary path. When it is down, failing, or the peer has
//! gone silent, messages are deposited in the shared mailbox instead. Each
//! message uses exactly one of the two.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bridge::{DeliveryCoordinator, DeliveryStatus};
//! use bridge_config::BridgeConfig;
//! use codec::{Direction, SignalPayload};
//! use rust_decimal::Decimal;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = DeliveryCoordinator::new(BridgeConfig::load(None)?).await?;
//! coordinator.start().await?;
//!
//! let handle = coordinator
//!     .submit(SignalPayload::market("EURUSD", Direction::Buy, Decimal::new(1, 2)))
//!     .await?;
//! if let DeliveryStatus::Failed(reason) = handle.wait().await {
//!     eprintln!("signal {} not delivered: {}", handle.sequence_id(), reason);
//! }
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod handle;
pub mod handler;
pub mod health;
pub mod session;
mod stats;

pub use coordinator::DeliveryCoordinator;
pub use error::{DeliveryError, HandlerError, SessionError};
pub use handle::{DeliveryHandle, DeliveryStatus, FailureReason, Route};
pub use handler::{HandlerOutcome, HandlerRegistry, MessageHandler};
pub use health::{PeerHealth, PeerState};
pub use session::{InboundOutcome, Outbound, Session};
pub use stats::CoordinatorStats;
