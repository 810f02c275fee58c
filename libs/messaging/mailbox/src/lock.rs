//! Cross-process store lock
//!
//! On Unix the lock is an exclusive `flock` on `<root>/.lock`, polled without
//! blocking until the caller's timeout. Every acquisition opens its own file
//! description, so two tasks in one process exclude each other exactly like
//! two processes do, and [`StoreLock`] can be shared freely between tasks.
//!
//! Holding a guard does not grant a second one: a nested acquisition from the
//! same task is treated like any other contender and returns
//! [`MailboxError::LockTimeout`] once its timeout expires.
//!
//! When no lock facility is available (non-Unix targets, or the lock file
//! cannot be opened or locked for reasons other than contention) the lock
//! switches to [`LockMode::Degraded`] for good: acquisition becomes a no-op and
//! atomic renames are the only protection against double claims.

use crate::error::{MailboxError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Delay between non-blocking lock attempts
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Whether acquisitions provide real mutual exclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Exclusive,
    Degraded,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Exclusive => "exclusive",
            LockMode::Degraded => "degraded",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive lock over one mailbox directory
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    mode: RwLock<LockMode>,
}

/// Held lock; released on drop
#[must_use = "the store lock is released as soon as the guard is dropped"]
pub struct StoreLockGuard {
    #[cfg(unix)]
    _flock: Option<nix::fcntl::Flock<std::fs::File>>,
}

impl fmt::Debug for StoreLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLockGuard").finish_non_exhaustive()
    }
}

impl StoreLockGuard {
    fn degraded() -> Self {
        Self {
            #[cfg(unix)]
            _flock: None,
        }
    }
}

impl StoreLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let initial = if cfg!(unix) {
            LockMode::Exclusive
        } else {
            LockMode::Degraded
        };
        if initial == LockMode::Degraded {
            warn!("No file lock facility on this platform; mailbox runs without a store lock");
        }
        Self {
            path: path.into(),
            mode: RwLock::new(initial),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        *self.mode.read()
    }

    /// Switch to degraded mode, logging only on the first switch
    fn degrade(&self, reason: &str) {
        let mut mode = self.mode.write();
        if *mode == LockMode::Exclusive {
            *mode = LockMode::Degraded;
            warn!(
                path = %self.path.display(),
                reason,
                "Mailbox lock unavailable; continuing without a store lock"
            );
        }
    }

    /// Acquire the lock, waiting at most `timeout`
    pub async fn acquire(&self, timeout: Duration) -> Result<StoreLockGuard> {
        if self.mode() == LockMode::Degraded {
            return Ok(StoreLockGuard::degraded());
        }
        self.acquire_exclusive(timeout).await
    }

    #[cfg(unix)]
    async fn acquire_exclusive(&self, timeout: Duration) -> Result<StoreLockGuard> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let path = self.path.clone();
        let opened = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
        })
        .await
        .map_err(|e| MailboxError::io("open lock file", &self.path, std::io::Error::other(e)))?;

        let mut file = match opened {
            Ok(file) => file,
            Err(e) => {
                self.degrade(&format!("cannot open lock file: {}", e));
                return Ok(StoreLockGuard::degraded());
            }
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => {
                    return Ok(StoreLockGuard {
                        _flock: Some(flock),
                    })
                }
                Err((returned, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EINTR => {
                    file = returned;
                }
                Err((_, errno)) => {
                    self.degrade(&format!("flock failed: {}", errno));
                    return Ok(StoreLockGuard::degraded());
                }
            }

            if tokio::time::Instant::now() >= deadline {
                debug!(path = %self.path.display(), "Mailbox lock wait expired");
                return Err(MailboxError::LockTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    #[cfg(not(unix))]
    async fn acquire_exclusive(&self, _timeout: Duration) -> Result<StoreLockGuard> {
        self.degrade("no file lock facility");
        Ok(StoreLockGuard::degraded())
    }
}
