//! Result merging
//!
//! Combines every per-worker result file of one day into a single file.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{info, warn};

use super::sheet::Table;
use super::{merged_file_name, RESULT_EXTENSION, RESULT_PREFIX};

/// Merges per-worker result files in an output directory
#[derive(Clone, Debug)]
pub struct ResultMerger {
    output_dir: PathBuf,
}

/// Outcome of a merge pass
#[derive(Clone, Debug)]
pub struct MergeReport {
    pub path: PathBuf,
    pub files_merged: usize,
    pub files_skipped: usize,
    pub rows: usize,
    pub columns: usize,
}

impl ResultMerger {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Per-worker files for `date` (`YYYYMMDD`), oldest first
    pub fn find_result_files(&self, date: &str) -> Result<Vec<PathBuf>> {
        if !self.output_dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{RESULT_PREFIX}{date}");
        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        let entries = fs::read_dir(&self.output_dir).with_context(|| {
            format!("Failed to list output directory {}", self.output_dir.display())
        })?;

        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix) && n.ends_with(RESULT_EXTENSION))
                .unwrap_or(false);
            if !matches || !path.is_file() {
                continue;
            }
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }

        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Merge the files for `date` into `merged_results_<timestamp>.csv`.
    ///
    /// Unreadable files are logged and left out. Returns `None` when there is
    /// nothing readable to merge.
    pub fn merge(&self, date: &str) -> Result<Option<MergeReport>> {
        let files = self.find_result_files(date)?;
        if files.is_empty() {
            info!(
                "No result files for {} in {}, nothing to merge",
                date,
                self.output_dir.display()
            );
            return Ok(None);
        }

        let mut merged = Table::new();
        let mut files_merged = 0;
        let mut files_skipped = 0;
        for path in &files {
            match Table::read(path) {
                Ok(table) => {
                    merged.append_table(&table);
                    files_merged += 1;
                }
                Err(e) => {
                    warn!("Skipping unreadable result file {}: {:#}", path.display(), e);
                    files_skipped += 1;
                }
            }
        }

        if files_merged == 0 {
            warn!("None of {} result file(s) could be read, merge aborted", files.len());
            return Ok(None);
        }

        let path = self.output_dir.join(merged_file_name(Local::now()));
        merged
            .write(&path)
            .with_context(|| format!("Failed to write merged file {}", path.display()))?;

        info!(
            "Merged {} file(s), {} row(s) into {}",
            files_merged,
            merged.len(),
            path.display()
        );

        Ok(Some(MergeReport {
            path,
            files_merged,
            files_skipped,
            rows: merged.len(),
            columns: merged.columns.len(),
        }))
    }
}
