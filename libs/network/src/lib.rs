//! # Signal Bridge Socket Channel
//!
//! Primary transport of the bridge: a length-prefixed TCP duplex stream to a
//! single peer, with an explicit connection state machine and a timeout on
//! every operation.
//!
//! ## What This Crate Does NOT Contain
//! - Message encoding (belongs in `codec`); frames here are opaque bytes
//! - Fallback or reconnect policy (belongs in `bridge`)

pub mod channel;
pub mod error;
pub mod frame;
mod stats;

pub use channel::{ChannelEvent, ConnectionState, SocketChannel, SocketChannelConfig, SocketRole};
pub use error::{Result, TransportError};
pub use frame::{read_frame, write_frame, FRAME_HEADER_SIZE};
pub use stats::ChannelStats;
