//! # Signal Bridge Mailbox
//!
//! Fallback transport of the bridge: encoded messages exchanged as files in a
//! directory both processes can reach. Works without any network path and
//! keeps every handled entry as an audit trail.
//!
//! ## Guarantees
//! - Readers never see a partially written entry (temp file + atomic rename)
//! - At most one receiver claims an entry (store lock + rename into `processing`)
//! - Entries are never deleted; they end in `confirmed` or `failed`

pub mod entry;
pub mod error;
pub mod lock;
pub mod store;

pub use entry::{Bucket, ClaimedEntry, EntryName};
pub use error::{MailboxError, Result};
pub use lock::{LockMode, StoreLock, StoreLockGuard};
pub use store::{Mailbox, LOCK_FILE_NAME};
