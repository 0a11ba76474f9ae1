//! Worker pass
//!
//! One worker loads the shared case set, runs the cases it owns, and reports
//! a summary. Ending the session (clearing the record and the published
//! case set, merging result files) is left to whoever owns the whole run.

use anyhow::{anyhow, Result};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::partition::WorkerPartitioner;
use super::runner::CaseRunner;
use crate::cases::CaseLoader;
use crate::config::{AppConfig, LockConfig, WorkerIdentity};
use crate::models::WorkerSummary;
use crate::operations::OperationRegistry;
use crate::results::{result_file_name, MergeReport, ResultMerger, ResultSheet};

/// Everything one worker needs to know about its run
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub run_id: String,
    pub resume: bool,
    pub identity: WorkerIdentity,
    pub lock: LockConfig,
    pub case_timeout: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &AppConfig, run_id: impl Into<String>, identity: WorkerIdentity) -> Self {
        Self {
            input_path: config.input_path.clone(),
            output_dir: config.output_dir.clone(),
            cache_dir: config.cache_dir.clone(),
            run_id: run_id.into(),
            resume: config.continue_from_last,
            identity,
            lock: config.lock.clone(),
            case_timeout: config.backends.case_timeout(),
        }
    }

    pub fn loader(&self) -> CaseLoader {
        CaseLoader::new(&self.input_path, &self.cache_dir).with_lock_settings(self.lock.clone())
    }
}

/// Run this worker's share of the run.
///
/// A lone worker has no peers to share a snapshot with, so it drops any
/// snapshot left by an interrupted pass and reloads against the record.
/// Returns `None` when the published case set is empty. A fatal case error
/// (losing result rows) aborts the pass.
pub async fn run_worker(
    options: &WorkerOptions,
    registry: Arc<OperationRegistry>,
) -> Result<Option<WorkerSummary>> {
    let tag = options.identity.tag();
    let loader = options.loader();
    if options.identity.is_single() {
        loader.clear_snapshot(&options.run_id);
    }
    let set = loader.load_shared(&options.run_id, options.resume).await?;
    if set.is_empty() {
        info!("[{}] No cases to run for run {}", tag, options.run_id);
        return Ok(None);
    }

    let partitioner = WorkerPartitioner::new(options.identity, set.index_span);
    let range = partitioner.range();
    info!(
        "[{}] Worker {}/{} owns {} index(es) {} of {} ({} remaining in run {})",
        tag,
        options.identity.ordinal + 1,
        options.identity.count,
        range.len(),
        range,
        set.index_span,
        set.len(),
        options.run_id
    );
    if range.is_empty() {
        warn!("[{}] More workers than cases, this worker owns none", tag);
    }

    let sheet = ResultSheet::new(
        options
            .output_dir
            .join(result_file_name(Local::now(), &tag)),
    );
    let mut runner = CaseRunner::new(registry, partitioner, sheet, loader.record().clone())
        .with_case_timeout(options.case_timeout);

    let reports = runner
        .run_all(&set.cases)
        .await
        .map_err(|e| anyhow!("[{}] Worker stopped: {}", tag, e))?;

    let result_file = runner
        .sheet()
        .exists()
        .then(|| runner.sheet().path().to_path_buf());
    let summary = WorkerSummary::new(tag, (range.start, range.end), reports, result_file);
    info!(
        "[{}] Finished: {} succeeded, {} failed, {} row(s) written",
        summary.worker, summary.succeeded, summary.failed, summary.rows_written
    );
    Ok(Some(summary))
}

/// End a run: merge today's result files and forget the run's progress
pub fn end_session(config: &AppConfig, run_id: &str) -> Result<Option<MergeReport>> {
    let merged = ResultMerger::new(&config.output_dir).merge(&crate::results::today())?;

    let loader = CaseLoader::from_config(config);
    loader.record().clear();
    loader.clear_snapshot(run_id);
    info!("Session for run {} ended", run_id);
    Ok(merged)
}
