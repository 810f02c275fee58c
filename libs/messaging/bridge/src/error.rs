//! Bridge error types

use codec::ProtocolError;
use mailbox::MailboxError;
use network::TransportError;
use thiserror::Error;

/// Failure to hand a message to either transport
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The payload failed validation before anything was sent
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] ProtocolError),

    /// Mailbox write failed for a reason other than lock contention
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    /// The mailbox lock stayed contended through every retry
    #[error("Mailbox lock contended after {attempts} attempts")]
    LockContention { attempts: u32 },

    /// Socket setup failed while starting the coordinator
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Coordinator is shut down")]
    ShutDown,
}

impl DeliveryError {
    pub fn category(&self) -> &'static str {
        match self {
            DeliveryError::InvalidPayload(_) => "invalid_payload",
            DeliveryError::Mailbox(_) => "mailbox",
            DeliveryError::LockContention { .. } => "lock_contention",
            DeliveryError::Transport(_) => "transport",
            DeliveryError::Configuration(_) => "configuration",
            DeliveryError::ShutDown => "shut_down",
        }
    }
}

/// Request/response failures
#[derive(Error, Debug)]
pub enum SessionError {
    /// No StatusResponse arrived within the acknowledgment deadline
    #[error("No status response within {timeout_ms}ms")]
    StatusTimeout { timeout_ms: u64 },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Session is shut down")]
    ShutDown,
}

/// Returned by a [`MessageHandler`](crate::MessageHandler) that did not process a message
///
/// The text is recorded as the mailbox failure reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The message was understood but refused
    #[error("rejected: {0}")]
    Rejected(String),

    /// The handler could not complete
    #[error("failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
