//! Data models for the case harness
//!
//! This module contains the case, result-row, and report types shared by the
//! loader, runner, and result writers.

mod case;
mod report;

pub use case::{parse_flag, Case, CaseArgs, CaseSet, ResultRow};
pub use report::{CaseReport, CaseStatus, WorkerSummary};
