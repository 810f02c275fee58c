//! Mailbox error types

use std::path::PathBuf;
use thiserror::Error;

/// Mailbox store failures
#[derive(Error, Debug)]
pub enum MailboxError {
    /// The store lock could not be acquired within the configured bound
    #[error("Mailbox lock not acquired within {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    /// Filesystem failure
    #[error("Mailbox I/O error: {context} ({path:?})")]
    Io {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file name that does not follow `<origin>.<sequence>.msg`
    #[error("Invalid mailbox entry name '{name}': {reason}")]
    InvalidEntryName { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, MailboxError>;

impl MailboxError {
    pub fn io(context: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntryName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Contention that may clear on a later attempt
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, MailboxError::LockTimeout { .. })
    }

    pub fn category(&self) -> &'static str {
        match self {
            MailboxError::LockTimeout { .. } => "lock_timeout",
            MailboxError::Io { .. } => "io",
            MailboxError::InvalidEntryName { .. } => "invalid_entry_name",
        }
    }
}
