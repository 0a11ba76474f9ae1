//! Case loader
//!
//! Loads the ordered case set for a run. When several workers start at once,
//! the first to take the lock reads the table and publishes a snapshot; the
//! rest reuse that snapshot unchanged.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::lock::CaseLock;
use super::table::read_cases;
use crate::config::{AppConfig, LockConfig};
use crate::models::{Case, CaseSet};
use crate::record::RecordStore;
use crate::utils::fs::atomic_write;

const SNAPSHOT_PREFIX: &str = "case_set_";

/// Loads and publishes the case set
#[derive(Clone, Debug)]
pub struct CaseLoader {
    input_path: PathBuf,
    cache_dir: PathBuf,
    record: RecordStore,
    lock: LockConfig,
}

impl CaseLoader {
    pub fn new(input_path: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            input_path: input_path.into(),
            record: RecordStore::in_dir(&cache_dir),
            cache_dir,
            lock: LockConfig::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.input_path, &config.cache_dir).with_lock_settings(config.lock.clone())
    }

    pub fn with_lock_settings(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn record(&self) -> &RecordStore {
        &self.record
    }

    /// Where the published case set for `run_id` lives
    pub fn snapshot_path(&self, run_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{SNAPSHOT_PREFIX}{run_id}.json"))
    }

    pub fn lock_path(&self, run_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{SNAPSHOT_PREFIX}{run_id}.lock"))
    }

    /// Read and filter the case table in this process, without publishing.
    ///
    /// `total_count` is taken after skip filtering and before the resume filter.
    pub fn load_local(&self, run_id: &str, resume: bool) -> Result<CaseSet> {
        let rows = read_cases(&self.input_path)?;
        let index_span = rows.len();

        let mut cases: Vec<Case> = rows.into_iter().filter(|c| !c.is_skip).collect();
        let total_count = cases.len();

        let resumed_from = if resume { self.record.load() } else { 0 };
        if resumed_from > 0 {
            cases.retain(|c| c.index >= resumed_from);
        }

        info!(
            "Loaded {} case(s) from {} ({} after skip filter, resuming from {})",
            cases.len(),
            self.input_path.display(),
            total_count,
            resumed_from
        );

        Ok(CaseSet {
            run_id: run_id.to_string(),
            total_count,
            index_span,
            resumed_from,
            cases,
        })
    }

    /// Load the case set once per run across every cooperating process.
    ///
    /// A worker that cannot take the lock in time waits for the fallback
    /// period and then uses whatever was published, or an empty set.
    pub async fn load_shared(&self, run_id: &str, resume: bool) -> Result<CaseSet> {
        let snapshot = self.snapshot_path(run_id);

        match CaseLock::acquire(&self.lock_path(run_id), &self.lock).await? {
            Some(_guard) => {
                if let Some(set) = read_snapshot(&snapshot) {
                    debug!("Reusing published case set {}", snapshot.display());
                    return Ok(set);
                }

                let set = self.load_local(run_id, resume)?;
                let bytes = serde_json::to_vec(&set).context("Failed to serialize case set")?;
                atomic_write(&snapshot, &bytes).with_context(|| {
                    format!("Failed to publish case set to {}", snapshot.display())
                })?;
                info!(
                    "Published case set {} ({} case(s))",
                    snapshot.display(),
                    set.len()
                );
                Ok(set)
            }
            None => {
                tokio::time::sleep(self.lock.fallback_wait()).await;
                match read_snapshot(&snapshot) {
                    Some(set) => Ok(set),
                    None => {
                        warn!("No case set published for run {}, nothing to do", run_id);
                        Ok(CaseSet::empty(run_id))
                    }
                }
            }
        }
    }

    /// Remove the published snapshot so the next run reloads the table
    pub fn clear_snapshot(&self, run_id: &str) {
        remove_snapshot(&self.snapshot_path(run_id));
    }

    /// Remove every published snapshot in the cache directory.
    ///
    /// Returns how many were removed.
    pub fn clear_all_snapshots(&self) -> usize {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Failed to list {}: {}", self.cache_dir.display(), e);
                return 0;
            }
        };

        entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_snapshot_file(path))
            .filter(|path| remove_snapshot(path))
            .count()
    }
}

fn is_snapshot_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(".json"))
        .unwrap_or(false)
}

fn remove_snapshot(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed case set {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove case set {}: {}", path.display(), e);
            false
        }
    }
}

/// Read a published case set; absent or malformed means not published
fn read_snapshot(path: &Path) -> Option<CaseSet> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read case set {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(set) => Some(set),
        Err(e) => {
            warn!("Ignoring malformed case set {}: {}", path.display(), e);
            None
        }
    }
}
