//! Case execution engine
//!
//! Partitions the case set across workers, runs a worker's cases, and
//! supervises multi-process runs.

pub mod launcher;
pub mod partition;
mod runner;
mod worker;

pub use launcher::{launch, LaunchOptions, LaunchReport, EXIT_CASES_FAILED, EXIT_FATAL, EXIT_OK};
pub use partition::{plan, PlanEntry};
pub use worker::{end_session, run_worker, WorkerOptions};
