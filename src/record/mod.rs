//! Resume record storage
//!
//! Persists "the next case index to execute" so an interrupted run continues
//! where it stopped. The record is shared by every worker of a run and written
//! after each case; concurrent writers race and the last write wins. A lost
//! update only causes a few finished cases to run again.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::utils::fs::atomic_write;

/// File name of the record inside the cache directory
pub const RECORD_FILE_NAME: &str = "test_record.json";

/// On-disk record format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub last_index: usize,
}

/// Resume record store
#[derive(Clone, Debug)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    /// Create a store backed by an explicit file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the well-known location inside `cache_dir`
    pub fn in_dir(cache_dir: impl AsRef<Path>) -> Self {
        Self::new(cache_dir.as_ref().join(RECORD_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `index` as the next case to execute.
    ///
    /// The previous record stays intact if the write fails.
    pub fn save(&self, index: usize) -> Result<()> {
        let bytes = serde_json::to_vec(&RunRecord { last_index: index })
            .context("Failed to serialize run record")?;
        atomic_write(&self.path, &bytes)
            .with_context(|| format!("Failed to save run record to {}", self.path.display()))?;
        debug!("Saved resume index {} to {}", index, self.path.display());
        Ok(())
    }

    /// Load the next case index; 0 when the record is absent or unreadable
    pub fn load(&self) -> usize {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Failed to read run record {}: {}", self.path.display(), e);
                return 0;
            }
        };

        match serde_json::from_str::<RunRecord>(&content) {
            Ok(record) => record.last_index,
            Err(e) => {
                warn!(
                    "Ignoring malformed run record {}: {}",
                    self.path.display(),
                    e
                );
                0
            }
        }
    }

    /// Delete the record. Best effort: failures are logged, never returned.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Cleared run record {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear run record {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_never_written() {
        let dir = tempdir().unwrap();
        let store = RecordStore::in_dir(dir.path());
        assert_eq!(store.load(), 0);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = RecordStore::in_dir(dir.path().join("test_cache"));

        store.save(5).unwrap();
        assert_eq!(store.load(), 5);

        store.save(9).unwrap();
        assert_eq!(store.load(), 9);
    }

    #[test]
    fn test_clear_resets_to_zero() {
        let dir = tempdir().unwrap();
        let store = RecordStore::in_dir(dir.path());

        store.save(5).unwrap();
        store.clear();
        assert_eq!(store.load(), 0);
        assert!(!store.path().exists());

        // Clearing again is not an error
        store.clear();
    }

    #[test]
    fn test_load_corrupted_record() {
        let dir = tempdir().unwrap();
        let store = RecordStore::in_dir(dir.path());

        fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load(), 0);

        fs::write(store.path(), r#"{"other_key": 3}"#).unwrap();
        assert_eq!(store.load(), 0);

        fs::write(store.path(), r#"{"last_index": -4}"#).unwrap();
        assert_eq!(store.load(), 0);
    }

    #[test]
    fn test_record_format() {
        let dir = tempdir().unwrap();
        let store = RecordStore::in_dir(dir.path());

        store.save(7).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"last_index": 7}));
    }

    #[test]
    fn test_save_failure_keeps_previous_record() {
        let dir = tempdir().unwrap();
        let store = RecordStore::in_dir(dir.path());
        store.save(3).unwrap();

        // The parent of this path is a regular file, so the write fails
        let blocked = RecordStore::new(store.path().join("nested.json"));
        assert!(blocked.save(4).is_err());
        assert_eq!(store.load(), 3);
    }
}
