//! # Bridge Message and Wire Format
//!
//! ## Wire Layout
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SBRG"
//! 4       1     version
//! 5       1     type tag (1-5)
//! 6       8     sequence_id    (big-endian)
//! 14      8     timestamp_ns   (big-endian)
//! 22      4     payload_len    (big-endian)
//! 26      N     payload        (canonical JSON of the typed payload)
//! 26+N    4     checksum       CRC32 over bytes [4, 26+N)
//! ```
//!
//! The payload region is length-delimited, so escaped payload strings can never
//! break framing, and it is covered by the checksum together with the header
//! fields that identify the message.
//!
//! ## Decode Order
//!
//! Structure (length, magic, version, declared length) → type tag → checksum →
//! payload parse → canonical form → semantic validation. The checksum is always
//! recomputed; the value on the wire is only ever compared against.

use crate::checksum::StreamingChecksum;
use crate::error::{DecodeError, DecodeResult, ProtocolError, ProtocolResult};
use crate::payload::{MessageType, Payload};
use crate::validation::PayloadValidator;
use bytes::Bytes;

/// Magic bytes opening every encoded message
pub const MESSAGE_MAGIC: [u8; 4] = *b"SBRG";

/// Current wire version
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header size preceding the payload
pub const HEADER_SIZE: usize = 26;

/// Trailing checksum size
pub const CHECKSUM_SIZE: usize = 4;

/// Largest canonical payload accepted in either direction
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Smallest possible encoded message (empty payload)
pub const MIN_MESSAGE_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Immutable bridge message
///
/// Built through [`Message::new`] (which validates the payload and computes the
/// checksum) or [`decode`]. There are no setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    sequence_id: u64,
    timestamp_ns: u64,
    payload: Payload,
    payload_bytes: Bytes,
    checksum: u32,
}

impl Message {
    /// Construct a message, validating the payload and computing its checksum
    pub fn new(sequence_id: u64, timestamp_ns: u64, payload: impl Into<Payload>) -> ProtocolResult<Self> {
        let payload = payload.into();
        payload.validate()?;

        let payload_bytes = payload.to_canonical()?;
        if payload_bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_bytes.len(),
                limit: MAX_PAYLOAD_BYTES,
            });
        }

        let message_type = payload.message_type();
        let checksum = compute_checksum(message_type, sequence_id, timestamp_ns, &payload_bytes);

        Ok(Self {
            message_type,
            sequence_id,
            timestamp_ns,
            payload,
            payload_bytes: Bytes::from(payload_bytes),
            checksum,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Size of the encoded form in bytes
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload_bytes.len() + CHECKSUM_SIZE
    }
}

fn write_header(buf: &mut Vec<u8>, message_type: MessageType, sequence_id: u64, timestamp_ns: u64, payload_len: usize) {
    buf.push(PROTOCOL_VERSION);
    buf.push(message_type.tag());
    buf.extend_from_slice(&sequence_id.to_be_bytes());
    buf.extend_from_slice(&timestamp_ns.to_be_bytes());
    buf.extend_from_slice(&(payload_len as u32).to_be_bytes());
}

fn compute_checksum(message_type: MessageType, sequence_id: u64, timestamp_ns: u64, payload: &[u8]) -> u32 {
    let mut header = Vec::with_capacity(HEADER_SIZE - MESSAGE_MAGIC.len());
    write_header(&mut header, message_type, sequence_id, timestamp_ns, payload.len());

    let mut checksum = StreamingChecksum::new();
    checksum.update(&header);
    checksum.update(payload);
    checksum.finalize()
}

/// Encode a message into its canonical wire form
///
/// Deterministic: the same message always produces the same bytes.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.encoded_len());
    buf.extend_from_slice(&MESSAGE_MAGIC);
    write_header(
        &mut buf,
        message.message_type,
        message.sequence_id,
        message.timestamp_ns,
        message.payload_bytes.len(),
    );
    buf.extend_from_slice(&message.payload_bytes);
    buf.extend_from_slice(&message.checksum.to_be_bytes());
    buf
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(raw)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(raw)
}

/// Decode and fully verify a wire message
pub fn decode(data: &[u8]) -> DecodeResult<Message> {
    if data.len() < MIN_MESSAGE_SIZE {
        return Err(DecodeError::malformed(format!(
            "need at least {} bytes, got {}",
            MIN_MESSAGE_SIZE,
            data.len()
        )));
    }

    if data[..4] != MESSAGE_MAGIC {
        return Err(DecodeError::malformed(format!(
            "invalid magic {:02x?}",
            &data[..4]
        )));
    }

    let version = data[4];
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::malformed(format!(
            "unsupported version {} (supported: {})",
            version, PROTOCOL_VERSION
        )));
    }

    let payload_len = read_u32(data, 22) as usize;
    if payload_len > MAX_PAYLOAD_BYTES {
        return Err(DecodeError::malformed(format!(
            "declared payload {} bytes exceeds limit {}",
            payload_len, MAX_PAYLOAD_BYTES
        )));
    }
    let expected_len = HEADER_SIZE + payload_len + CHECKSUM_SIZE;
    if data.len() != expected_len {
        return Err(DecodeError::malformed(format!(
            "length mismatch: header declares {} bytes total, buffer has {} (truncated or trailing data)",
            expected_len,
            data.len()
        )));
    }

    let message_type = MessageType::from_tag(data[5])?;
    let sequence_id = read_u64(data, 6);
    let timestamp_ns = read_u64(data, 14);

    let payload_end = HEADER_SIZE + payload_len;
    let payload_bytes = &data[HEADER_SIZE..payload_end];
    let wire_checksum = read_u32(data, payload_end);
    let calculated = compute_checksum(message_type, sequence_id, timestamp_ns, payload_bytes);
    if wire_checksum != calculated {
        return Err(DecodeError::checksum_mismatch(wire_checksum, calculated));
    }

    let payload = Payload::from_canonical(message_type, payload_bytes)?;

    let canonical = payload
        .to_canonical()
        .map_err(|e| DecodeError::malformed(e.to_string()))?;
    if canonical.as_slice() != payload_bytes {
        return Err(DecodeError::malformed(format!(
            "{} payload is not in canonical form",
            message_type
        )));
    }

    payload
        .validate()
        .map_err(|e| DecodeError::malformed(e.to_string()))?;

    Ok(Message {
        message_type,
        sequence_id,
        timestamp_ns,
        payload,
        payload_bytes: Bytes::copy_from_slice(payload_bytes),
        checksum: calculated,
    })
}
