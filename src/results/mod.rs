//! Result files
//!
//! Per-worker result sheets and the merge that combines them.

mod merge;
mod sheet;

use chrono::{DateTime, Local};

pub use merge::{MergeReport, ResultMerger};
pub use sheet::{Accumulator, ResultSheet};
#[cfg(test)]
pub use sheet::Table;

/// File name prefix of per-worker result files
pub const RESULT_PREFIX: &str = "test_results_";

/// File name prefix of merged result files
pub const MERGED_PREFIX: &str = "merged_results_";

pub const RESULT_EXTENSION: &str = ".csv";

/// `test_results_<YYYYMMDD_HHMMSS>_<tag>.csv`
pub fn result_file_name(started: DateTime<Local>, tag: &str) -> String {
    format!(
        "{RESULT_PREFIX}{}_{tag}{RESULT_EXTENSION}",
        started.format("%Y%m%d_%H%M%S")
    )
}

/// `merged_results_<YYYYMMDD_HHMMSS>.csv`
pub fn merged_file_name(at: DateTime<Local>) -> String {
    format!(
        "{MERGED_PREFIX}{}{RESULT_EXTENSION}",
        at.format("%Y%m%d_%H%M%S")
    )
}

/// Today's date as used in result file names
pub fn today() -> String {
    Local::now().format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_names() {
        let at = Local.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap();
        assert_eq!(result_file_name(at, "gw1"), "test_results_20260105_093000_gw1.csv");
        assert_eq!(merged_file_name(at), "merged_results_20260105_093000.csv");
        assert!(result_file_name(at, "gw0").starts_with(&format!("{RESULT_PREFIX}20260105")));
    }

    #[test]
    fn test_today_format() {
        let date = today();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
    }
}
