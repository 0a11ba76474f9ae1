//! Case runner
//!
//! Runs one worker's cases in order. Every attempted case is flushed to the
//! worker's result file and advances the resume record, whether the
//! operation succeeded or not.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::partition::WorkerPartitioner;
use crate::models::{Case, CaseReport, CaseStatus, ResultRow};
use crate::operations::{OperationContext, OperationRegistry, SessionState};
use crate::record::RecordStore;
use crate::results::{Accumulator, ResultSheet};
use crate::utils::{round_secs, Timer};

/// Why a case did not succeed
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("Unknown operation '{name}'")]
    UnknownOperation { name: String },

    #[error("Operation '{operation}' requires field '{field}'")]
    MissingField { field: String, operation: String },

    #[error("{message}")]
    Failed { message: String, elapsed_secs: f64 },

    #[error("Failed to flush results: {0}")]
    Flush(String),
}

impl CaseError {
    /// Fatal errors stop the worker; the rest fail only the case
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaseError::Flush(_))
    }

    pub fn elapsed_secs(&self) -> f64 {
        match self {
            CaseError::Failed { elapsed_secs, .. } => *elapsed_secs,
            _ => 0.0,
        }
    }
}

/// Sequential runner for the cases of one worker
pub struct CaseRunner {
    registry: Arc<OperationRegistry>,
    partitioner: WorkerPartitioner,
    sheet: ResultSheet,
    record: RecordStore,
    accumulator: Accumulator,
    session: SessionState,
    case_timeout: Duration,
    tag: String,
}

impl CaseRunner {
    pub fn new(
        registry: Arc<OperationRegistry>,
        partitioner: WorkerPartitioner,
        sheet: ResultSheet,
        record: RecordStore,
    ) -> Self {
        Self {
            tag: partitioner.identity().tag(),
            registry,
            partitioner,
            sheet,
            record,
            accumulator: Accumulator::new(),
            session: SessionState::new(),
            case_timeout: Duration::from_secs(180),
        }
    }

    pub fn with_case_timeout(mut self, timeout: Duration) -> Self {
        self.case_timeout = timeout;
        self
    }

    pub fn sheet(&self) -> &ResultSheet {
        &self.sheet
    }

    #[cfg(test)]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    #[cfg(test)]
    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    /// Run one case.
    ///
    /// Cases outside this worker's range are not executed, but still advance
    /// the resume record. Failed cases are flushed and recorded before the
    /// error is returned. A flush failure leaves the record untouched.
    pub async fn run_case(&mut self, case: &Case) -> Result<CaseReport, CaseError> {
        if !self.partitioner.owns(case.index) {
            debug!("[{}] case_{} not owned, skipping", self.tag, case.index);
            self.save_record(case.index + 1);
            return Ok(CaseReport::not_owned(case.index, &case.operation));
        }

        info!(
            "[{}] case_{} {} started",
            self.tag, case.index, case.operation
        );
        let timer = Timer::start(format!("case_{}", case.index));
        let (rows, outcome) = self.execute(case).await;
        let elapsed = round_secs(timer.elapsed_secs());

        let status = if outcome.is_ok() {
            CaseStatus::Succeeded
        } else {
            CaseStatus::Failed
        };
        let mut stamped: Vec<ResultRow> = rows
            .into_iter()
            .map(|row| stamp_row(case.index, row, elapsed, status))
            .collect();
        if let Err(err) = &outcome {
            stamped.push(error_row(case, err, elapsed));
        }
        let row_count = stamped.len();
        for row in stamped {
            self.accumulator.push(row);
        }

        self.flush()?;
        if case.clear_context {
            debug!("[{}] case_{} clears context", self.tag, case.index);
            self.accumulator.clear();
            self.session.reset();
        }
        self.save_record(case.index + 1);

        let elapsed_ms = timer.stop().as_millis() as u64;
        match outcome {
            Ok(()) => {
                info!(
                    "[{}] case_{} {} succeeded in {:.2}s ({} row(s))",
                    self.tag, case.index, case.operation, elapsed, row_count
                );
                Ok(CaseReport::succeeded(
                    case.index,
                    &case.operation,
                    row_count,
                    elapsed_ms,
                ))
            }
            Err(err) => {
                error!(
                    "[{}] case_{} {} failed after {:.2}s: {}",
                    self.tag, case.index, case.operation, elapsed, err
                );
                Err(err)
            }
        }
    }

    /// Run every case in order.
    ///
    /// Non-fatal failures become failed reports; a fatal error stops the pass.
    pub async fn run_all(&mut self, cases: &[Case]) -> Result<Vec<CaseReport>, CaseError> {
        let mut reports = Vec::with_capacity(cases.len());
        for case in cases {
            match self.run_case(case).await {
                Ok(report) => reports.push(report),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => reports.push(CaseReport::failed(
                    case.index,
                    &case.operation,
                    (err.elapsed_secs() * 1000.0) as u64,
                    err.to_string(),
                )),
            }
        }
        Ok(reports)
    }

    /// Resolve and invoke the operation, returning the rows it emitted
    async fn execute(&mut self, case: &Case) -> (Vec<ResultRow>, Result<(), CaseError>) {
        let Some(operation) = self.registry.get(&case.operation) else {
            return (
                Vec::new(),
                Err(CaseError::UnknownOperation {
                    name: case.operation.clone(),
                }),
            );
        };

        let args = case.args();
        if let Some(field) = args.first_missing(operation.required_fields()) {
            return (
                Vec::new(),
                Err(CaseError::MissingField {
                    field: field.to_string(),
                    operation: case.operation.clone(),
                }),
            );
        }

        let timer = Timer::start(format!("{} execute", case.operation));
        let mut ctx = OperationContext::new(case.index, &mut self.session);
        let result = tokio::time::timeout(self.case_timeout, operation.execute(&args, &mut ctx)).await;
        let rows = ctx.into_rows();

        let outcome = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CaseError::Failed {
                message: format!("{e:#}"),
                elapsed_secs: round_secs(timer.elapsed_secs()),
            }),
            Err(_) => Err(CaseError::Failed {
                message: format!("Timed out after {}s", self.case_timeout.as_secs_f64()),
                elapsed_secs: round_secs(timer.elapsed_secs()),
            }),
        };
        (rows, outcome)
    }

    fn flush(&mut self) -> Result<(), CaseError> {
        let pending = self.accumulator.pending();
        if pending.is_empty() {
            return Ok(());
        }
        self.sheet
            .append(pending)
            .map_err(|e| CaseError::Flush(format!("{e:#}")))?;
        self.accumulator.mark_flushed();
        Ok(())
    }

    fn save_record(&self, next: usize) {
        if let Err(e) = self.record.save(next) {
            warn!("[{}] Failed to save resume index {}: {:#}", self.tag, next, e);
        }
    }
}

/// `case_index` first, then the operation's columns, then timing and status
/// when the operation did not set them
fn stamp_row(index: usize, row: ResultRow, elapsed: f64, status: CaseStatus) -> ResultRow {
    let mut stamped = ResultRow::new();
    stamped.insert("case_index".into(), json!(index));
    for (key, value) in row {
        if key != "case_index" {
            stamped.insert(key, value);
        }
    }
    stamped
        .entry("elapsed_secs")
        .or_insert_with(|| json!(elapsed));
    stamped
        .entry("case_status")
        .or_insert_with(|| Value::from(status.as_str()));
    stamped
}

fn error_row(case: &Case, err: &CaseError, elapsed: f64) -> ResultRow {
    let mut row = ResultRow::new();
    row.insert("case_index".into(), json!(case.index));
    row.insert("operation".into(), json!(case.operation));
    row.insert("case_status".into(), json!(CaseStatus::Failed.as_str()));
    row.insert("error".into(), json!(err.to_string()));
    row.insert("elapsed_secs".into(), json!(elapsed));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerIdentity;
    use crate::models::CaseArgs;
    use crate::operations::Operation;
    use crate::results::Table;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tempfile::{tempdir, TempDir};

    struct Echo;

    #[async_trait]
    impl Operation for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn required_fields(&self) -> &[&'static str] {
            &["query"]
        }

        async fn execute(&self, args: &CaseArgs, ctx: &mut OperationContext<'_>) -> Result<()> {
            let query = args.str_or("query", "").to_string();
            let turns = ctx.session().history.len();
            ctx.session().push_turn(&query, "ok");
            let mut row = ResultRow::new();
            row.insert("query".into(), json!(query));
            row.insert("turns_before".into(), json!(turns));
            ctx.emit(row);
            Ok(())
        }
    }

    /// Emits one row, then fails
    struct Flaky;

    #[async_trait]
    impl Operation for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _args: &CaseArgs, ctx: &mut OperationContext<'_>) -> Result<()> {
            let mut row = ResultRow::new();
            row.insert("partial".into(), json!("first turn"));
            ctx.emit(row);
            Err(anyhow!("backend returned 502"))
        }
    }

    struct Slow;

    #[async_trait]
    impl Operation for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _args: &CaseArgs, _ctx: &mut OperationContext<'_>) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    fn registry() -> Arc<OperationRegistry> {
        Arc::new(
            OperationRegistry::new()
                .with(Echo)
                .with(Flaky)
                .with(Slow),
        )
    }

    fn runner(dir: &TempDir, identity: WorkerIdentity, total: usize) -> CaseRunner {
        CaseRunner::new(
            registry(),
            WorkerPartitioner::new(identity, total),
            ResultSheet::new(dir.path().join("out").join("results.csv")),
            RecordStore::in_dir(dir.path().join("cache")),
        )
    }

    fn echo(index: usize, query: &str) -> Case {
        Case::new(index, "echo").with_field("query", query)
    }

    #[tokio::test]
    async fn test_success_flushes_and_records() {
        let dir = tempdir().unwrap();
        let mut runner = runner(&dir, WorkerIdentity::single(), 3);

        let report = runner.run_case(&echo(0, "hello")).await.unwrap();
        assert_eq!(report.status, CaseStatus::Succeeded);
        assert_eq!(report.rows, 1);

        let table = Table::read(runner.sheet().path()).unwrap();
        assert_eq!(
            table.columns,
            vec!["case_index", "query", "turns_before", "elapsed_secs", "case_status"]
        );
        assert_eq!(table.cell(0, "case_status"), Some("succeeded"));
        assert_eq!(RecordStore::in_dir(dir.path().join("cache")).load(), 1);
    }

    #[tokio::test]
    async fn test_unknown_operation_still_flushes_and_records() {
        let dir = tempdir().unwrap();
        let mut runner = runner(&dir, WorkerIdentity::single(), 3);

        let err = runner
            .run_case(&Case::new(1, "does_not_exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, CaseError::UnknownOperation { .. }));
        assert!(!err.is_fatal());

        let table = Table::read(runner.sheet().path()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.cell(0, "case_index"), Some("1"));
        assert_eq!(table.cell(0, "case_status"), Some("failed"));
        assert_eq!(
            table.cell(0, "error"),
            Some("Unknown operation 'does_not_exist'")
        );
        assert_eq!(RecordStore::in_dir(dir.path().join("cache")).load(), 2);
    }

    #[tokio::test]
    async fn test_missing_field() {
        let dir = tempdir().unwrap();
        let mut runner = runner(&dir, WorkerIdentity::single(), 1);

        let err = runner
            .run_case(&Case::new(0, "echo").with_field("query", "  "))
            .await
            .unwrap_err();
        match err {
            CaseError::MissingField { field, operation } => {
                assert_eq!(field, "query");
                assert_eq!(operation, "echo");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(RecordStore::in_dir(dir.path().join("cache")).load(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_rows() {
        let dir = tempdir().unwrap();
        let mut runner = runner(&dir, WorkerIdentity::single(), 1);

        let err = runner.run_case(&Case::new(0, "flaky")).await.unwrap_err();
        assert!(err.to_string().contains("502"));

        let table = Table::read(runner.sheet().path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, "partial"), Some("first turn"));
        assert_eq!(table.cell(0, "case_status"), Some("failed"));
        assert_eq!(table.cell(1, "operation"), Some("flaky"));
        assert_eq!(table.cell(1, "partial"), Some(""));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failed_case() {
        let dir = tempdir().unwrap();
        let mut runner =
            runner(&dir, WorkerIdentity::single(), 1).with_case_timeout(Duration::from_millis(50));

        let err = runner.run_case(&Case::new(0, "slow")).await.unwrap_err();
        assert!(matches!(err, CaseError::Failed { .. }));
        assert!(err.to_string().starts_with("Timed out"));
        assert_eq!(RecordStore::in_dir(dir.path().join("cache")).load(), 1);
    }

    // A worker advances the shared record past cases owned by other workers,
    // so the record tracks the highest index any worker has looked at.
    #[tokio::test]
    async fn test_not_owned_case_advances_record() {
        let dir = tempdir().unwrap();
        let identity = WorkerIdentity::new(1, 2).unwrap();
        let mut runner = runner(&dir, identity, 4);

        let report = runner.run_case(&echo(0, "q0")).await.unwrap();
        assert_eq!(report.status, CaseStatus::NotOwned);
        assert!(!runner.sheet().exists());
        assert!(runner.accumulator().is_empty());
        assert_eq!(RecordStore::in_dir(dir.path().join("cache")).load(), 1);
    }

    #[tokio::test]
    async fn test_clear_context() {
        let dir = tempdir().unwrap();
        let mut runner = runner(&dir, WorkerIdentity::single(), 3);
        let user = runner.session().user.clone();

        runner.run_case(&echo(0, "a")).await.unwrap();
        runner
            .run_case(&echo(1, "b").with_clear_context(true))
            .await
            .unwrap();
        assert!(runner.accumulator().is_empty());
        assert!(runner.session().history.is_empty());
        assert_eq!(runner.session().user, user);

        runner.run_case(&echo(2, "c")).await.unwrap();

        let table = Table::read(runner.sheet().path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.cell(1, "turns_before"), Some("1"));
        assert_eq!(table.cell(2, "turns_before"), Some("0"));
    }

    #[tokio::test]
    async fn test_rows_are_flushed_once() {
        let dir = tempdir().unwrap();
        let mut runner = runner(&dir, WorkerIdentity::single(), 3);

        for case in [echo(0, "a"), echo(1, "b"), echo(2, "c")] {
            runner.run_case(&case).await.unwrap();
        }

        let table = Table::read(runner.sheet().path()).unwrap();
        let indices: Vec<&str> = (0..table.len())
            .filter_map(|i| table.cell(i, "case_index"))
            .collect();
        assert_eq!(indices, vec!["0", "1", "2"]);
        assert!(runner.accumulator().pending().is_empty());
    }

    #[tokio::test]
    async fn test_flush_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let record = RecordStore::in_dir(dir.path().join("cache"));
        let mut runner = CaseRunner::new(
            registry(),
            WorkerPartitioner::new(WorkerIdentity::single(), 2),
            ResultSheet::new(blocker.join("results.csv")),
            record.clone(),
        );

        let err = runner
            .run_all(&[echo(0, "a"), echo(1, "b")])
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(record.load(), 0);
        assert_eq!(runner.accumulator().pending().len(), 1);
    }

    #[tokio::test]
    async fn test_run_all_continues_after_failures() {
        let dir = tempdir().unwrap();
        let mut runner = runner(&dir, WorkerIdentity::single(), 3);

        let reports = runner
            .run_all(&[echo(0, "a"), Case::new(1, "flaky"), echo(2, "c")])
            .await
            .unwrap();

        let statuses: Vec<CaseStatus> = reports.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![CaseStatus::Succeeded, CaseStatus::Failed, CaseStatus::Succeeded]
        );
        assert!(reports[1].error.as_deref().unwrap().contains("502"));
        assert_eq!(RecordStore::in_dir(dir.path().join("cache")).load(), 3);
    }
}
