//! Cross-process case-loading lock
//!
//! A lock file created with `create_new`, so exactly one process holds it.
//! The holder's pid and acquisition time are written into the file. The file
//! is removed when the guard drops.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

use crate::config::LockConfig;

/// Contents of a held lock file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub acquired_at: String,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct CaseLock {
    path: PathBuf,
}

impl CaseLock {
    /// Try once. `Ok(None)` when another process holds the lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                let owner = LockOwner {
                    pid: std::process::id(),
                    acquired_at: Utc::now().to_rfc3339(),
                };
                let payload = serde_json::to_vec(&owner)?;
                let _ = file.write_all(&payload);
                let _ = file.sync_all();
                debug!("Acquired case lock {}", path.display());
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to create lock file: {}", path.display())),
        }
    }

    /// Poll until the lock is free or `settings.timeout()` elapses.
    ///
    /// A lock file older than the timeout is left over from a dead process.
    /// It is removed only while it still names the same holder, so a lock a
    /// peer re-created in the meantime survives. `Ok(None)` means the wait
    /// timed out.
    pub async fn acquire(path: &Path, settings: &LockConfig) -> Result<Option<Self>> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(Some(lock));
            }

            if let Some(stale) = StaleLock::observe(path, settings) {
                if stale.remove_if_unchanged(path) {
                    warn!("Removed stale case lock {}", path.display());
                    continue;
                }
            }

            if started.elapsed() >= settings.timeout() {
                warn!(
                    "Timed out after {}s waiting for case lock {}",
                    settings.timeout_secs,
                    path.display()
                );
                return Ok(None);
            }

            tokio::time::sleep(settings.poll_interval()).await;
        }
    }

    /// Current holder of the lock at `path`, if readable
    pub fn owner(path: &Path) -> Option<LockOwner> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl Drop for CaseLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// A lock file seen to be older than the timeout, as it looked then
#[derive(Debug, PartialEq)]
struct StaleLock {
    owner: Option<LockOwner>,
    modified: SystemTime,
}

impl StaleLock {
    fn observe(path: &Path, settings: &LockConfig) -> Option<Self> {
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        let age = SystemTime::now().duration_since(modified).ok()?;
        (age > settings.timeout()).then(|| Self {
            owner: CaseLock::owner(path),
            modified,
        })
    }

    /// Remove the lock file if it still has the holder and mtime observed
    fn remove_if_unchanged(&self, path: &Path) -> bool {
        let current = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => Self {
                owner: CaseLock::owner(path),
                modified,
            },
            Err(_) => return false,
        };
        if current != *self {
            debug!("Case lock {} changed hands, keeping it", path.display());
            return false;
        }
        fs::remove_file(path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn fast_settings() -> LockConfig {
        LockConfig {
            timeout_secs: 1,
            fallback_wait_secs: 0,
            poll_interval_ms: 10,
        }
    }

    #[test]
    fn test_try_acquire_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case_set.lock");

        let first = CaseLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(CaseLock::try_acquire(&path).unwrap().is_none());

        let owner = CaseLock::owner(&path).unwrap();
        assert_eq!(owner.pid, std::process::id());

        drop(first);
        assert!(!path.exists());
        assert!(CaseLock::try_acquire(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case_set.lock");

        let held = CaseLock::try_acquire(&path).unwrap().unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(held);
        });

        let lock = CaseLock::acquire(&path, &fast_settings()).await.unwrap();
        assert!(lock.is_some());
        release.await.unwrap();
    }

    fn backdate(path: &Path, secs: u64) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_replaces_stale_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case_set.lock");
        let dead = CaseLock::try_acquire(&path).unwrap().unwrap();
        std::mem::forget(dead);
        backdate(&path, 60);

        let lock = CaseLock::acquire(&path, &fast_settings()).await.unwrap();
        assert!(lock.is_some());
        assert!(path.exists());
    }

    #[test]
    fn test_stale_removal_keeps_recreated_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case_set.lock");
        fs::write(&path, r#"{"pid":1,"acquired_at":"2026-01-01T00:00:00Z"}"#).unwrap();
        backdate(&path, 60);

        // Two waiters both see the dead holder
        let first = StaleLock::observe(&path, &fast_settings()).unwrap();
        let second = StaleLock::observe(&path, &fast_settings()).unwrap();
        assert_eq!(first.owner.as_ref().map(|o| o.pid), Some(1));

        // The first clears it and takes the lock
        assert!(first.remove_if_unchanged(&path));
        let held = CaseLock::try_acquire(&path).unwrap().unwrap();

        // The second must leave the fresh lock alone
        assert!(!second.remove_if_unchanged(&path));
        assert!(path.exists());
        assert_eq!(CaseLock::owner(&path).unwrap().pid, std::process::id());
        drop(held);
    }

    #[test]
    fn test_fresh_lock_is_not_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case_set.lock");
        let _held = CaseLock::try_acquire(&path).unwrap().unwrap();
        assert!(StaleLock::observe(&path, &fast_settings()).is_none());
    }

    #[tokio::test]
    async fn test_acquire_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case_set.lock");
        let _held = CaseLock::try_acquire(&path).unwrap().unwrap();

        let started = Instant::now();
        let lock = CaseLock::acquire(&path, &fast_settings()).await.unwrap();
        assert!(lock.is_none());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
