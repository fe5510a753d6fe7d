//! Exclusive lock files for serializing same-date publishes.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use moltdigest_shared::{DigestError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Locks older than this are assumed to belong to a crashed process.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(600);

/// Held lock file; removed when dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Create `path` exclusively. `Ok(None)` when another holder has it.
    ///
    /// A missing parent directory is created.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let opened = match create_exclusive(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| DigestError::publish_io(parent, e))?;
                }
                create_exclusive(path)
            }
            other => other,
        };
        match opened {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                debug!(path = %path.display(), "lock acquired");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(DigestError::publish_io(path, e)),
        }
    }

    /// Poll for the lock until `timeout` elapses.
    ///
    /// A lock file older than [`STALE_LOCK_AGE`] is removed once and retried.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if is_stale(path) && claim_stale(path) {
                continue;
            }
            if Instant::now() >= deadline {
                return Err(DigestError::publish_io(
                    path,
                    std::io::Error::new(
                        ErrorKind::TimedOut,
                        format!("lock still held after {}s", timeout.as_secs()),
                    ),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn create_exclusive(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Remove a stale lock at `path`. Returns `true` when one was removed.
///
/// The lock is first renamed to a private name so that only one waiter can
/// claim it. If the claimed file turns out to be fresh (another waiter already
/// replaced the stale lock), it is linked back into place untouched.
fn claim_stale(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let claimed = path.with_file_name(format!("{name}.{}.stale", Uuid::now_v7()));
    if std::fs::rename(path, &claimed).is_err() {
        return false;
    }

    if is_stale(&claimed) {
        warn!(path = %path.display(), "removing stale lock file");
        let _ = std::fs::remove_file(&claimed);
        return true;
    }

    if let Err(e) = std::fs::hard_link(&claimed, path) {
        warn!(error = %e, path = %path.display(), "could not hand back a fresh lock");
    }
    let _ = std::fs::remove_file(&claimed);
    false
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}
