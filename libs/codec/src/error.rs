//! Codec errors for bridge message construction and decoding
//!
//! Decoding failures are split into the three classes the delivery layer reacts
//! to differently (structural breakage, integrity failure, unknown type). None of
//! them are retried by the codec; they are reported upward with enough context
//! to log a useful failure reason next to a rejected mailbox entry.

use thiserror::Error;

/// Decoding errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Structural breakage: truncated buffer, bad magic, bad length, invalid payload
    #[error("Malformed message: {reason}")]
    Malformed { reason: String },

    /// Recomputed checksum disagrees with the one carried on the wire
    #[error("Checksum mismatch: expected {expected:#010x}, calculated {calculated:#010x} (cause: {likely_cause})")]
    ChecksumMismatch {
        expected: u32,
        calculated: u32,
        likely_cause: String,
    },

    /// Type tag is not one of the declared message types
    #[error("Unknown message type tag {tag}: valid tags are 1-5")]
    UnknownType { tag: u8 },
}

impl DecodeError {
    /// Create a Malformed error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Create a ChecksumMismatch error with a best-effort diagnosis
    pub fn checksum_mismatch(expected: u32, calculated: u32) -> Self {
        let likely_cause = if expected == 0 {
            "message written without checksum calculation"
        } else {
            "data corruption during transport or storage"
        };

        Self::ChecksumMismatch {
            expected,
            calculated,
            likely_cause: likely_cause.to_string(),
        }
    }

    /// Short machine-friendly label, used in failure reasons and logs
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Malformed { .. } => "malformed",
            DecodeError::ChecksumMismatch { .. } => "checksum_mismatch",
            DecodeError::UnknownType { .. } => "unknown_type",
        }
    }
}

/// Errors raised while constructing a message from a payload
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A payload field failed semantic validation
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// Canonical payload exceeds the protocol limit
    #[error("Payload too large: {size} bytes exceeds limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Payload could not be serialized to its canonical form
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl ProtocolError {
    /// Create an InvalidField error
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for decode operations
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Result type for message construction
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_diagnosis() {
        let err = DecodeError::checksum_mismatch(0, 0xDEADBEEF);
        assert!(err.to_string().contains("without checksum"));

        let err = DecodeError::checksum_mismatch(0x1234, 0xDEADBEEF);
        assert!(err.to_string().contains("corruption"));
        assert_eq!(err.kind(), "checksum_mismatch");
    }

    #[test]
    fn test_unknown_type_display() {
        let err = DecodeError::UnknownType { tag: 42 };
        assert_eq!(err.kind(), "unknown_type");
        assert!(err.to_string().contains("42"));
    }
}
