//! Four-bucket directory mailbox
//!
//! ```text
//! <root>/
//!   .lock
//!   incoming/    complete entries waiting for the receiver
//!   processing/  claimed by exactly one receiver
//!   confirmed/   handled successfully (terminal)
//!   failed/      rejected, with a <name>.reason sidecar (terminal)
//! ```
//!
//! Entries move between buckets only by rename. Writers stage a hidden temp
//! file and rename it into `incoming`, so a reader never observes a partial
//! entry. Claims rename under the store lock, so two receivers never own the
//! same entry. Terminal entries are kept as an audit trail.

use crate::entry::{Bucket, ClaimedEntry, EntryName, ENTRY_SUFFIX};
use crate::error::{MailboxError, Result};
use crate::lock::{LockMode, StoreLock};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Name of the lock file under the mailbox root
pub const LOCK_FILE_NAME: &str = ".lock";

/// Longest reason text written to a sidecar
const MAX_REASON_LEN: usize = 512;

/// Shared-directory message store
#[derive(Debug)]
pub struct Mailbox {
    root: PathBuf,
    lock: StoreLock,
    lock_timeout: Duration,
}

impl Mailbox {
    /// Open the mailbox, creating the bucket directories if needed
    pub async fn open(root: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self> {
        let root = root.into();
        for bucket in Bucket::ALL {
            let dir = root.join(bucket.dir_name());
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| MailboxError::io("create bucket directory", &dir, e))?;
        }

        let lock = StoreLock::new(root.join(LOCK_FILE_NAME));
        info!(root = %root.display(), "Mailbox opened");
        Ok(Self {
            root,
            lock,
            lock_timeout,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock.mode()
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn bucket_dir(&self, bucket: Bucket) -> PathBuf {
        self.root.join(bucket.dir_name())
    }

    fn entry_path(&self, bucket: Bucket, name: &EntryName) -> PathBuf {
        self.bucket_dir(bucket).join(name.file_name())
    }

    /// Publish an encoded message into `incoming`
    ///
    /// The bytes are staged and synced before the lock is taken; only the
    /// rename happens under the lock. On [`MailboxError::LockTimeout`] the
    /// staged file is removed and nothing becomes visible.
    pub async fn deposit(&self, origin: &str, sequence_id: u64, bytes: &[u8]) -> Result<EntryName> {
        let name = EntryName::new(origin, sequence_id)?;
        let incoming = self.bucket_dir(Bucket::Incoming);
        let temp_path = incoming.join(name.temp_file_name());
        let final_path = incoming.join(name.file_name());

        if let Err(e) = write_synced(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        let guard = match self.lock.acquire(self.lock_timeout).await {
            Ok(guard) => guard,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };
        let renamed = fs::rename(&temp_path, &final_path).await;
        drop(guard);

        if let Err(e) = renamed {
            let _ = fs::remove_file(&temp_path).await;
            return Err(MailboxError::io("publish entry", &final_path, e));
        }

        debug!(entry = %name, bytes = bytes.len(), "Mailbox entry deposited");
        Ok(name)
    }

    /// Move the oldest eligible entry into `processing` and read it
    ///
    /// Entries whose origin is `exclude_origin` (this process's own outbound
    /// entries) are left for the peer. An entry that cannot be read once
    /// claimed is archived under `failed` before the error is returned.
    pub async fn claim(&self, exclude_origin: &str) -> Result<Option<ClaimedEntry>> {
        let guard = self.lock.acquire(self.lock_timeout).await?;
        let claimed = self.claim_locked(exclude_origin).await;
        drop(guard);

        let Some((name, path)) = claimed? else {
            return Ok(None);
        };

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                // Already out of incoming; park it where it cannot be lost
                let reason = format!("read failed: {}", e);
                if let Err(archive) = self.archive_failed(&name, &path, &reason).await {
                    warn!(entry = %name, error = %archive, "Unreadable entry left in processing");
                }
                return Err(MailboxError::io("read claimed entry", &path, e));
            }
        };

        debug!(entry = %name, bytes = bytes.len(), "Mailbox entry claimed");
        Ok(Some(ClaimedEntry { name, path, bytes }))
    }

    async fn claim_locked(&self, exclude_origin: &str) -> Result<Option<(EntryName, PathBuf)>> {
        let candidates = self.scan(Bucket::Incoming).await?;

        for name in candidates.into_iter().filter(|n| n.origin() != exclude_origin) {
            let from = self.entry_path(Bucket::Incoming, &name);
            let to = self.entry_path(Bucket::Processing, &name);
            match fs::rename(&from, &to).await {
                Ok(()) => return Ok(Some((name, to))),
                // Lost a race with a receiver that does not honor the lock
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(MailboxError::io("claim entry", &from, e)),
            }
        }
        Ok(None)
    }

    /// Archive a handled entry under `confirmed`
    pub async fn confirm(&self, entry: &ClaimedEntry) -> Result<()> {
        let to = self.entry_path(Bucket::Confirmed, &entry.name);
        fs::rename(&entry.path, &to)
            .await
            .map_err(|e| MailboxError::io("confirm entry", &entry.path, e))?;
        debug!(entry = %entry.name, "Mailbox entry confirmed");
        Ok(())
    }

    /// Archive a rejected entry under `failed` with a reason sidecar
    pub async fn fail(&self, entry: &ClaimedEntry, reason: &str) -> Result<()> {
        self.archive_failed(&entry.name, &entry.path, reason).await
    }

    async fn archive_failed(&self, name: &EntryName, from: &Path, reason: &str) -> Result<()> {
        let to = self.entry_path(Bucket::Failed, name);
        fs::rename(from, &to)
            .await
            .map_err(|e| MailboxError::io("fail entry", from, e))?;

        let reason_path = self.bucket_dir(Bucket::Failed).join(name.reason_file_name());
        let mut text = sanitize_reason(reason);
        text.push('\n');
        if let Err(e) = write_synced(&reason_path, text.as_bytes()).await {
            // The entry itself is archived; a missing sidecar only loses detail
            warn!(entry = %name, "Failed to write failure reason: {}", e);
        }

        warn!(entry = %name, reason, "Mailbox entry failed");
        Ok(())
    }

    /// Return entries orphaned in `processing` by a crashed receiver
    ///
    /// Orphans from origins other than `exclude_origin` go back to `incoming`.
    /// An orphan whose name is already archived is moved to `failed` as a
    /// duplicate instead of being delivered twice. Returns the number of
    /// entries moved back to `incoming`.
    pub async fn recover_orphans(&self, exclude_origin: &str) -> Result<usize> {
        let guard = self.lock.acquire(self.lock_timeout).await?;
        let orphans = self.scan(Bucket::Processing).await?;
        let mut recovered = 0;

        for name in orphans.into_iter().filter(|n| n.origin() != exclude_origin) {
            let from = self.entry_path(Bucket::Processing, &name);

            let mut archived = false;
            for bucket in Bucket::ALL.into_iter().filter(Bucket::is_terminal) {
                if path_exists(&self.entry_path(bucket, &name)).await {
                    archived = true;
                    break;
                }
            }
            if archived {
                self.archive_failed(&name, &from, "orphan duplicate of an archived entry")
                    .await?;
                continue;
            }

            let to = self.entry_path(Bucket::Incoming, &name);
            match fs::rename(&from, &to).await {
                Ok(()) => {
                    info!(entry = %name, "Recovered orphaned mailbox entry");
                    recovered += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(MailboxError::io("recover entry", &from, e)),
            }
        }
        drop(guard);

        Ok(recovered)
    }

    /// Entry names in a bucket, in claim order
    pub async fn list(&self, bucket: Bucket) -> Result<Vec<EntryName>> {
        self.scan(bucket).await
    }

    pub async fn count(&self, bucket: Bucket) -> Result<usize> {
        Ok(self.scan(bucket).await?.len())
    }

    /// Failure reason recorded for an entry in `failed`, if any
    pub async fn failure_reason(&self, name: &EntryName) -> Result<Option<String>> {
        let path = self.bucket_dir(Bucket::Failed).join(name.reason_file_name());
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text.trim_end().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MailboxError::io("read failure reason", &path, e)),
        }
    }

    /// Complete entries in a bucket, sorted; temp files and sidecars are skipped
    async fn scan(&self, bucket: Bucket) -> Result<Vec<EntryName>> {
        let dir = self.bucket_dir(bucket);
        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| MailboxError::io("scan bucket", &dir, e))?;

        let mut names = Vec::new();
        while let Some(item) = reader
            .next_entry()
            .await
            .map_err(|e| MailboxError::io("scan bucket", &dir, e))?
        {
            let file_name = item.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') || !file_name.ends_with(ENTRY_SUFFIX) {
                continue;
            }
            match EntryName::parse(file_name) {
                Ok(name) => names.push(name),
                Err(e) => debug!(bucket = %bucket, "Ignoring foreign file: {}", e),
            }
        }

        names.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(names)
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| MailboxError::io("create file", path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| MailboxError::io("write file", path, e))?;
    file.sync_all()
        .await
        .map_err(|e| MailboxError::io("sync file", path, e))?;
    Ok(())
}

async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Single line, printable, bounded
fn sanitize_reason(reason: &str) -> String {
    let mut text: String = reason
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if text.len() > MAX_REASON_LEN {
        let mut cut = MAX_REASON_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
