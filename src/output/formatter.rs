//! Output formatters for run results
//!
//! Provides table and JSON renderings of worker summaries, partition plans,
//! launches and merges.

use serde::Serialize;
use serde_json::json;

use crate::executor::{LaunchReport, PlanEntry};
use crate::models::{CaseStatus, WorkerSummary};
use crate::results::MergeReport;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            _ => None,
        }
    }
}

/// Summary formatter
pub struct SummaryFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl SummaryFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> String {
        if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    fn status_label(&self, status: CaseStatus) -> String {
        let plain = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return plain;
        }
        match status {
            CaseStatus::Succeeded => format!("\x1b[32m{plain}\x1b[0m"),
            CaseStatus::Failed => format!("\x1b[31m{plain}\x1b[0m"),
            CaseStatus::NotOwned => format!("\x1b[33m{plain}\x1b[0m"),
        }
    }

    /// Format one worker's summary
    pub fn format_summary(&self, summary: &WorkerSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            _ => self.to_json(summary),
        }
    }

    fn format_summary_table(&self, summary: &WorkerSummary) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Worker {} - cases [{}, {})\n",
            summary.worker, summary.range_start, summary.range_end
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for report in summary
            .reports
            .iter()
            .filter(|r| r.status != CaseStatus::NotOwned)
        {
            output.push_str(&format!(
                "║  case_{:<5} {:16} {} [{:>7}ms]\n",
                report.index,
                report.operation,
                self.status_label(report.status),
                report.elapsed_ms
            ));
            if let Some(error) = &report.error {
                output.push_str(&format!("║      {error}\n"));
            }
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        let fail_str = if self.colorize && summary.failed > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };
        output.push_str(&format!(
            "║  Executed: {} | Pass: {} | Fail: {} | Not owned: {}\n",
            summary.executed, summary.succeeded, fail_str, summary.not_owned
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Rows: {} | Duration: {}ms\n",
            summary.pass_rate(),
            summary.rows_written,
            summary.total_duration_ms
        ));
        if let Some(path) = &summary.result_file {
            output.push_str(&format!("║  Results: {}\n", path.display()));
        }
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    /// Format the partition plan for a case set
    pub fn format_plan(&self, run_id: &str, total: usize, entries: &[PlanEntry]) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut output = String::new();
                output.push_str(&format!(
                    "\nRun {run_id}: {total} case(s) after skip filter\n"
                ));
                output.push_str("┌────────┬──────────────────┬─────────┐\n");
                output.push_str("│ Worker │ Range            │ Cases   │\n");
                output.push_str("├────────┼──────────────────┼─────────┤\n");
                for entry in entries {
                    output.push_str(&format!(
                        "│ {:6} │ {:16} │ {:>7} │\n",
                        entry.worker,
                        entry.range.to_string(),
                        entry.cases
                    ));
                }
                output.push_str("└────────┴──────────────────┴─────────┘\n");
                output
            }
            _ => self.to_json(&json!({
                "run_id": run_id,
                "total_count": total,
                "workers": entries,
            })),
        }
    }

    /// Format the outcome of a launched run
    pub fn format_launch(&self, report: &LaunchReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut output = String::new();
                output.push_str(&format!("\nRun {}\n", report.run_id));
                for worker in &report.workers {
                    let code = worker
                        .code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "killed".to_string());
                    output.push_str(&format!("  {:6} exit {}\n", worker.worker, code));
                }
                if let Some(merge) = &report.merge {
                    output.push_str(&self.format_merge(merge));
                }
                output.push_str(if report.session_ended {
                    "  Session ended\n"
                } else {
                    "  Session kept for resume\n"
                });
                output
            }
            _ => {
                let mut value = json!(report);
                if let Some(merge) = &report.merge {
                    value["merged_file"] = json!(merge.path.display().to_string());
                }
                self.to_json(&value)
            }
        }
    }

    /// Format a merge report
    pub fn format_merge(&self, merge: &MergeReport) -> String {
        match self.format {
            OutputFormat::Table => format!(
                "  Merged {} file(s) ({} skipped): {} row(s) x {} column(s) -> {}\n",
                merge.files_merged,
                merge.files_skipped,
                merge.rows,
                merge.columns,
                merge.path.display()
            ),
            _ => self.to_json(&json!({
                "path": merge.path.display().to_string(),
                "files_merged": merge.files_merged,
                "files_skipped": merge.files_skipped,
                "rows": merge.rows,
                "columns": merge.columns,
            })),
        }
    }
}

impl Default for SummaryFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}
