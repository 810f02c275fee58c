//! Transport Error Types
//!
//! Failures of the framed socket channel. Every variant either tears the
//! connection down or is reported before any bytes reach the wire.

use std::net::SocketAddr;
use thiserror::Error;

/// Socket transport error
#[derive(Error, Debug)]
pub enum TransportError {
    /// Send attempted while the channel is not in the Connected state
    #[error("Not connected")]
    NotConnected,

    /// Connection establishment or management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Operation exceeded its deadline
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Frame length above the configured maximum
    #[error("Frame of {size} bytes exceeds maximum {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// Peer closed the stream
    #[error("Connection closed by peer")]
    Closed,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: std::io::Error,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(source),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn frame_too_large(size: usize, limit: usize) -> Self {
        Self::FrameTooLarge { size, limit }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Check if a later attempt on a fresh connection may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected
                | TransportError::Connection { .. }
                | TransportError::Timeout { .. }
                | TransportError::Closed
                | TransportError::Io { .. }
        )
    }

    /// Get error category for logging and stats
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::NotConnected => "not_connected",
            TransportError::Connection { .. } => "connection",
            TransportError::Timeout { .. } => "timeout",
            TransportError::FrameTooLarge { .. } => "frame_too_large",
            TransportError::Closed => "closed",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Io { .. } => "io",
        }
    }
}
