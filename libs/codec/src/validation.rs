//! Payload semantic validation
//!
//! Runs on construction and again on decode, so a peer cannot hand us a signal
//! that is structurally valid JSON but meaningless (empty instrument, zero size).

use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::{Payload, SignalPayload, StatusRequestPayload, StatusResponsePayload};
use rust_decimal::Decimal;

/// Maximum instrument identifier length
pub const MAX_INSTRUMENT_LEN: usize = 32;

/// Maximum free-text comment length on a signal
pub const MAX_COMMENT_LEN: usize = 256;

/// Maximum status key length
pub const MAX_STATUS_KEY_LEN: usize = 128;

/// Per-type payload validator
pub trait PayloadValidator {
    fn validate(&self) -> ProtocolResult<()>;
}

impl PayloadValidator for Payload {
    fn validate(&self) -> ProtocolResult<()> {
        match self {
            Payload::Heartbeat(_) | Payload::Confirmation(_) => Ok(()),
            Payload::StatusRequest(request) => request.validate(),
            Payload::StatusResponse(response) => response.validate(),
            Payload::Signal(signal) => signal.validate(),
        }
    }
}

impl PayloadValidator for SignalPayload {
    fn validate(&self) -> ProtocolResult<()> {
        if self.instrument.is_empty() {
            return Err(ProtocolError::invalid_field("instrument", "must not be empty"));
        }
        if self.instrument.len() > MAX_INSTRUMENT_LEN {
            return Err(ProtocolError::invalid_field(
                "instrument",
                format!("longer than {} bytes", MAX_INSTRUMENT_LEN),
            ));
        }
        if !self.instrument.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ProtocolError::invalid_field(
                "instrument",
                "only printable ASCII without whitespace is allowed",
            ));
        }
        if self.size <= Decimal::ZERO {
            return Err(ProtocolError::invalid_field("size", "must be positive"));
        }

        for (field, value) in [
            ("price", self.price),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
        ] {
            if let Some(value) = value {
                if value.is_sign_negative() {
                    return Err(ProtocolError::invalid_field(field, "must not be negative"));
                }
            }
        }

        if let Some(comment) = &self.comment {
            if comment.len() > MAX_COMMENT_LEN {
                return Err(ProtocolError::invalid_field(
                    "comment",
                    format!("longer than {} bytes", MAX_COMMENT_LEN),
                ));
            }
            check_no_control("comment", comment)?;
        }

        Ok(())
    }
}

impl PayloadValidator for StatusRequestPayload {
    fn validate(&self) -> ProtocolResult<()> {
        for field in &self.fields {
            check_status_key("fields", field)?;
        }
        Ok(())
    }
}

impl PayloadValidator for StatusResponsePayload {
    fn validate(&self) -> ProtocolResult<()> {
        for key in self.status.keys() {
            check_status_key("status", key)?;
        }
        Ok(())
    }
}

fn check_status_key(field: &str, key: &str) -> ProtocolResult<()> {
    if key.is_empty() || key.len() > MAX_STATUS_KEY_LEN {
        return Err(ProtocolError::invalid_field(
            field,
            format!("status keys must be 1-{} bytes", MAX_STATUS_KEY_LEN),
        ));
    }
    check_no_control(field, key)
}

fn check_no_control(field: &str, value: &str) -> ProtocolResult<()> {
    if value.chars().any(char::is_control) {
        return Err(ProtocolError::invalid_field(field, "control characters are not allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Direction;
    use rust_decimal_macros::dec;

    #[test]
    fn test_valid_signal() {
        let signal = SignalPayload::market("EURUSD", Direction::Buy, dec!(0.01))
            .with_price(dec!(1.0850))
            .with_stops(Some(dec!(1.0800)), Some(dec!(1.0950)));
        assert!(signal.validate().is_ok());
    }

    #[test]
    fn test_signal_rejects_bad_instrument() {
        let signal = SignalPayload::market("", Direction::Buy, dec!(1));
        assert!(signal.validate().is_err());

        let signal = SignalPayload::market("EUR USD", Direction::Buy, dec!(1));
        assert!(signal.validate().is_err());

        let signal = SignalPayload::market("EURUSD\n", Direction::Buy, dec!(1));
        assert!(signal.validate().is_err());

        let signal = SignalPayload::market("X".repeat(MAX_INSTRUMENT_LEN + 1), Direction::Buy, dec!(1));
        assert!(signal.validate().is_err());
    }

    #[test]
    fn test_signal_rejects_non_positive_size() {
        let signal = SignalPayload::market("EURUSD", Direction::Sell, dec!(0));
        match signal.validate() {
            Err(ProtocolError::InvalidField { field, .. }) => assert_eq!(field, "size"),
            other => panic!("expected size error, got {:?}", other),
        }
        let signal = SignalPayload::market("EURUSD", Direction::Sell, dec!(-0.5));
        assert!(signal.validate().is_err());
    }

    #[test]
    fn test_signal_rejects_negative_price_hint() {
        let signal = SignalPayload::market("EURUSD", Direction::Buy, dec!(1)).with_price(dec!(-1));
        assert!(signal.validate().is_err());
    }

    #[test]
    fn test_comment_control_characters_rejected() {
        let signal = SignalPayload::market("EURUSD", Direction::Buy, dec!(1)).with_comment("a\u{0007}b");
        assert!(signal.validate().is_err());
    }

    #[test]
    fn test_status_keys_validated() {
        let request = StatusRequestPayload {
            fields: vec!["balance".to_string(), "".to_string()],
        };
        assert!(request.validate().is_err());

        let mut response = StatusResponsePayload {
            request_sequence_id: 1,
            status: Default::default(),
        };
        response.status.insert("equity".to_string(), "10500.25".to_string());
        assert!(response.validate().is_ok());
        response.status.insert("bad\tkey".to_string(), "x".to_string());
        assert!(response.validate().is_err());
    }
}
