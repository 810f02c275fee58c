//! Mailbox buckets and entry names

use crate::error::{MailboxError, Result};
use std::fmt;
use std::path::PathBuf;

/// Suffix of a complete entry file
pub const ENTRY_SUFFIX: &str = ".msg";

/// Suffix of a failure reason sidecar in the failed bucket
pub const REASON_SUFFIX: &str = ".reason";

/// Lifecycle directories under the mailbox root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Incoming,
    Processing,
    Confirmed,
    Failed,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Incoming,
        Bucket::Processing,
        Bucket::Confirmed,
        Bucket::Failed,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Bucket::Incoming => "incoming",
            Bucket::Processing => "processing",
            Bucket::Confirmed => "confirmed",
            Bucket::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Bucket::Confirmed | Bucket::Failed)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// `<origin>.<sequence_id:020>.msg`
///
/// Zero-padded sequence ids make lexical order match numeric order per origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryName {
    origin: String,
    sequence_id: u64,
}

impl EntryName {
    pub fn new(origin: impl Into<String>, sequence_id: u64) -> Result<Self> {
        let origin = origin.into();
        validate_origin(&origin)?;
        Ok(Self { origin, sequence_id })
    }

    pub fn parse(file_name: &str) -> Result<Self> {
        let stem = file_name
            .strip_suffix(ENTRY_SUFFIX)
            .ok_or_else(|| MailboxError::invalid_name(file_name, "missing .msg suffix"))?;
        let (origin, sequence) = stem
            .rsplit_once('.')
            .ok_or_else(|| MailboxError::invalid_name(file_name, "missing sequence id"))?;

        if sequence.len() != 20 || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MailboxError::invalid_name(file_name, "sequence id must be 20 digits"));
        }
        let sequence_id = sequence
            .parse::<u64>()
            .map_err(|_| MailboxError::invalid_name(file_name, "sequence id out of range"))?;

        validate_origin(origin).map_err(|_| MailboxError::invalid_name(file_name, "invalid origin"))?;
        Ok(Self {
            origin: origin.to_string(),
            sequence_id,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn file_name(&self) -> String {
        format!("{}.{:020}{}", self.origin, self.sequence_id, ENTRY_SUFFIX)
    }

    /// Hidden temp name in the incoming bucket; scans skip dot files
    pub(crate) fn temp_file_name(&self) -> String {
        format!(".{}.tmp", self.file_name())
    }

    pub(crate) fn reason_file_name(&self) -> String {
        format!("{}{}", self.file_name(), REASON_SUFFIX)
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

fn validate_origin(origin: &str) -> Result<()> {
    if origin.is_empty() {
        return Err(MailboxError::invalid_name(origin, "origin must not be empty"));
    }
    if origin
        .chars()
        .any(|c| c == '.' || c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
    {
        return Err(MailboxError::invalid_name(
            origin,
            "origin must not contain '.', path separators or whitespace",
        ));
    }
    Ok(())
}

/// An entry moved into `processing` by this receiver
#[derive(Debug, Clone)]
pub struct ClaimedEntry {
    pub name: EntryName,
    /// Current location under `processing`
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}
