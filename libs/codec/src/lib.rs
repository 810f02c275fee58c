//! # Signal Bridge Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the bridge: message schema, canonical wire encoding,
//! integrity checksums and strict decoding. Both transports (socket frames and
//! mailbox files) carry exactly the bytes produced here.
//!
//! ## Architecture Role
//!
//! ```text
//!  session payloads → [codec] → network (framed socket)
//!                        ↓   ↘
//!                   checksum   mailbox (atomic files)
//! ```
//!
//! ## What This Crate Contains
//! - [`Message`] and the typed [`Payload`] union
//! - [`encode`] / [`decode`] with CRC32 verification
//! - Semantic payload validation applied on construction and decode
//! - [`SequenceGenerator`] for per-sender sequence ids and timestamps
//!
//! ## What This Crate Does NOT Contain
//! - Transport logic (belongs in `network` and `mailbox`)
//! - Delivery policy or acknowledgment tracking (belongs in `bridge`)

pub mod checksum;
pub mod error;
pub mod message;
pub mod payload;
pub mod sequence;
pub mod validation;

pub use error::{DecodeError, DecodeResult, ProtocolError, ProtocolResult};
pub use message::{
    decode, encode, Message, CHECKSUM_SIZE, HEADER_SIZE, MAX_PAYLOAD_BYTES, MESSAGE_MAGIC,
    MIN_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use payload::{
    ConfirmationPayload, Direction, HeartbeatPayload, MessageType, Payload, SignalPayload,
    StatusMap, StatusRequestPayload, StatusResponsePayload,
};
pub use sequence::{system_timestamp_ns, SequenceGenerator};
pub use validation::PayloadValidator;
