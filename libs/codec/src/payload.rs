//! Message types and their typed payloads
//!
//! Each [`MessageType`] owns exactly one payload shape. The wire header carries
//! the type tag, the payload region carries the canonical JSON of the matching
//! struct, so a payload is never accessed by untyped key lookup.

use crate::error::{DecodeError, DecodeResult, ProtocolError, ProtocolResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form status map carried by StatusResponse (sorted keys keep it canonical)
pub type StatusMap = BTreeMap<String, String>;

/// Message type tags (wire values 1-5)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    Heartbeat = 1,
    Confirmation = 2,
    StatusRequest = 3,
    StatusResponse = 4,
    Signal = 5,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::Heartbeat,
        MessageType::Confirmation,
        MessageType::StatusRequest,
        MessageType::StatusResponse,
        MessageType::Signal,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> DecodeResult<Self> {
        match tag {
            1 => Ok(MessageType::Heartbeat),
            2 => Ok(MessageType::Confirmation),
            3 => Ok(MessageType::StatusRequest),
            4 => Ok(MessageType::StatusResponse),
            5 => Ok(MessageType::Signal),
            _ => Err(DecodeError::UnknownType { tag }),
        }
    }

    /// Whether the sender waits for a Confirmation before reporting delivery
    pub fn requires_confirmation(self) -> bool {
        matches!(self, MessageType::Signal)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Heartbeat => "heartbeat",
            MessageType::Confirmation => "confirmation",
            MessageType::StatusRequest => "status_request",
            MessageType::StatusResponse => "status_response",
            MessageType::Signal => "signal",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Liveness beacon; carries the sender's interval so the peer can size its grace window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatPayload {
    pub interval_ms: u64,
}

/// Acknowledges successful processing of a prior message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfirmationPayload {
    pub acked_sequence_id: u64,
}

/// Status query; an empty field list asks for everything
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StatusRequestPayload {
    pub fields: Vec<String>,
}

/// Status answer correlated with the request's sequence id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusResponsePayload {
    pub request_sequence_id: u64,
    pub status: StatusMap,
}

/// Trade direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    Close,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => f.write_str("BUY"),
            Direction::Sell => f.write_str("SELL"),
            Direction::Close => f.write_str("CLOSE"),
        }
    }
}

/// Trading instruction handed over by the analysis side
///
/// Decimal fields serialize as strings so their scale survives the round trip
/// unchanged (`0.010` stays `0.010`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalPayload {
    pub instrument: String,
    pub direction: Direction,
    pub size: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl SignalPayload {
    /// Market order signal without price hints
    pub fn market(instrument: impl Into<String>, direction: Direction, size: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            direction,
            size,
            price: None,
            stop_loss: None,
            take_profit: None,
            comment: None,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_stops(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Type-tagged payload union
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Heartbeat(HeartbeatPayload),
    Confirmation(ConfirmationPayload),
    StatusRequest(StatusRequestPayload),
    StatusResponse(StatusResponsePayload),
    Signal(SignalPayload),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Heartbeat(_) => MessageType::Heartbeat,
            Payload::Confirmation(_) => MessageType::Confirmation,
            Payload::StatusRequest(_) => MessageType::StatusRequest,
            Payload::StatusResponse(_) => MessageType::StatusResponse,
            Payload::Signal(_) => MessageType::Signal,
        }
    }

    /// Serialize the variant to its canonical JSON bytes
    pub(crate) fn to_canonical(&self) -> ProtocolResult<Vec<u8>> {
        let result = match self {
            Payload::Heartbeat(p) => serde_json::to_vec(p),
            Payload::Confirmation(p) => serde_json::to_vec(p),
            Payload::StatusRequest(p) => serde_json::to_vec(p),
            Payload::StatusResponse(p) => serde_json::to_vec(p),
            Payload::Signal(p) => serde_json::to_vec(p),
        };
        result.map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Strictly parse payload bytes for the given type
    pub(crate) fn from_canonical(message_type: MessageType, bytes: &[u8]) -> DecodeResult<Self> {
        fn parse<T: serde::de::DeserializeOwned>(kind: MessageType, bytes: &[u8]) -> DecodeResult<T> {
            serde_json::from_slice(bytes)
                .map_err(|e| DecodeError::malformed(format!("{} payload: {}", kind, e)))
        }

        let payload = match message_type {
            MessageType::Heartbeat => Payload::Heartbeat(parse(message_type, bytes)?),
            MessageType::Confirmation => Payload::Confirmation(parse(message_type, bytes)?),
            MessageType::StatusRequest => Payload::StatusRequest(parse(message_type, bytes)?),
            MessageType::StatusResponse => Payload::StatusResponse(parse(message_type, bytes)?),
            MessageType::Signal => Payload::Signal(parse(message_type, bytes)?),
        };
        Ok(payload)
    }
}

impl From<SignalPayload> for Payload {
    fn from(signal: SignalPayload) -> Self {
        Payload::Signal(signal)
    }
}

impl From<HeartbeatPayload> for Payload {
    fn from(heartbeat: HeartbeatPayload) -> Self {
        Payload::Heartbeat(heartbeat)
    }
}

impl From<ConfirmationPayload> for Payload {
    fn from(confirmation: ConfirmationPayload) -> Self {
        Payload::Confirmation(confirmation)
    }
}

impl From<StatusRequestPayload> for Payload {
    fn from(request: StatusRequestPayload) -> Self {
        Payload::StatusRequest(request)
    }
}

impl From<StatusResponsePayload> for Payload {
    fn from(response: StatusResponsePayload) -> Self {
        Payload::StatusResponse(response)
    }
}
