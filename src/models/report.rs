//! Run report models
//!
//! Defines case outcomes and per-worker summaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Terminal state of one case on one worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Succeeded,
    Failed,
    NotOwned,
}

impl CaseStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            CaseStatus::Succeeded => "✓",
            CaseStatus::Failed => "✗",
            CaseStatus::NotOwned => "○",
        }
    }

    /// Value written to the `case_status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Succeeded => "succeeded",
            CaseStatus::Failed => "failed",
            CaseStatus::NotOwned => "not_owned",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CaseStatus::Succeeded)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Succeeded => write!(f, "PASS"),
            CaseStatus::Failed => write!(f, "FAIL"),
            CaseStatus::NotOwned => write!(f, "SKIP"),
        }
    }
}

/// Outcome of a single case
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseReport {
    pub index: usize,
    pub operation: String,
    pub status: CaseStatus,
    pub rows: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl CaseReport {
    pub fn succeeded(index: usize, operation: impl Into<String>, rows: usize, elapsed_ms: u64) -> Self {
        Self {
            index,
            operation: operation.into(),
            status: CaseStatus::Succeeded,
            rows,
            elapsed_ms,
            error: None,
        }
    }

    pub fn failed(
        index: usize,
        operation: impl Into<String>,
        elapsed_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            index,
            operation: operation.into(),
            status: CaseStatus::Failed,
            rows: 0,
            elapsed_ms,
            error: Some(error.into()),
        }
    }

    pub fn not_owned(index: usize, operation: impl Into<String>) -> Self {
        Self {
            index,
            operation: operation.into(),
            status: CaseStatus::NotOwned,
            rows: 0,
            elapsed_ms: 0,
            error: None,
        }
    }
}

impl fmt::Display for CaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} case_{} {} [{}ms]",
            self.status.symbol(),
            self.index,
            self.operation,
            self.elapsed_ms
        )?;
        if let Some(err) = &self.error {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}

/// Summary of one worker's pass over its owned cases
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker: String,
    pub range_start: usize,
    pub range_end: usize,
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_owned: usize,
    pub rows_written: usize,
    pub total_duration_ms: u64,
    pub result_file: Option<PathBuf>,
    pub reports: Vec<CaseReport>,
}

impl WorkerSummary {
    pub fn new(
        worker: impl Into<String>,
        range: (usize, usize),
        reports: Vec<CaseReport>,
        result_file: Option<PathBuf>,
    ) -> Self {
        let count = |status: CaseStatus| reports.iter().filter(|r| r.status == status).count();
        let succeeded = count(CaseStatus::Succeeded);
        let failed = count(CaseStatus::Failed);
        let not_owned = count(CaseStatus::NotOwned);
        let rows_written = reports.iter().map(|r| r.rows).sum();
        let total_duration_ms = reports.iter().map(|r| r.elapsed_ms).sum();

        Self {
            worker: worker.into(),
            range_start: range.0,
            range_end: range.1,
            executed: succeeded + failed,
            succeeded,
            failed,
            not_owned,
            rows_written,
            total_duration_ms,
            result_file,
            reports,
        }
    }

    /// Percentage of executed cases that succeeded
    pub fn pass_rate(&self) -> f64 {
        if self.executed == 0 {
            0.0
        } else {
            (self.succeeded as f64 / self.executed as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for WorkerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Worker {} - cases [{}, {})",
            self.worker, self.range_start, self.range_end
        )?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for report in self.reports.iter().filter(|r| r.status != CaseStatus::NotOwned) {
            writeln!(f, "  {report}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Executed: {} | Pass: {} | Fail: {} | Not owned: {}",
            self.executed, self.succeeded, self.failed, self.not_owned
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Rows: {} | Duration: {}ms",
            self.pass_rate(),
            self.rows_written,
            self.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_report_creation() {
        let report = CaseReport::succeeded(4, "meetask", 2, 1500);
        assert!(report.status.is_success());
        assert_eq!(report.rows, 2);

        let failed = CaseReport::failed(5, "meetask", 20, "backend timed out");
        assert_eq!(failed.status, CaseStatus::Failed);
        assert!(failed.to_string().contains("backend timed out"));
    }

    #[test]
    fn test_worker_summary() {
        let reports = vec![
            CaseReport::not_owned(0, "meetask"),
            CaseReport::succeeded(1, "meetask", 1, 100),
            CaseReport::failed(2, "meetask", 50, "boom"),
            CaseReport::succeeded(3, "meetask", 3, 200),
        ];

        let summary = WorkerSummary::new("gw1", (1, 4), reports, None);
        assert_eq!(summary.executed, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_owned, 1);
        assert_eq!(summary.rows_written, 4);
        assert_eq!(summary.total_duration_ms, 350);
        assert!(!summary.is_all_passed());
        assert!((summary.pass_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_empty_summary_pass_rate() {
        let summary = WorkerSummary::new("gw0", (0, 0), Vec::new(), None);
        assert_eq!(summary.pass_rate(), 0.0);
        assert!(summary.is_all_passed());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(CaseStatus::Failed.as_str(), "failed");
        assert_eq!(CaseStatus::NotOwned.to_string(), "SKIP");
    }
}
