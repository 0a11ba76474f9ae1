//! Multi-process launcher
//!
//! Spawns one `run` child per worker with its identity in the environment,
//! waits for all of them, then merges and ends the session.

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

use super::worker::end_session;
use crate::cases::CaseLoader;
use crate::config::env::EnvBuilder;
use crate::config::{AppConfig, WorkerIdentity};
use crate::results::MergeReport;

/// Worker exit code: every owned case succeeded
pub const EXIT_OK: i32 = 0;
/// Worker exit code: at least one case failed
pub const EXIT_CASES_FAILED: i32 = 1;
/// Worker exit code: the worker could not finish its pass
pub const EXIT_FATAL: i32 = 2;

/// How to start the worker children
#[derive(Clone, Debug)]
pub struct LaunchOptions {
    pub exe: PathBuf,
    pub workers: usize,
    pub run_id: String,
    pub config_file: Option<PathBuf>,
    pub input_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub resume: Option<bool>,
    pub verbose: bool,
}

impl LaunchOptions {
    pub fn new(exe: impl Into<PathBuf>, workers: usize, run_id: impl Into<String>) -> Self {
        Self {
            exe: exe.into(),
            workers: workers.max(1),
            run_id: run_id.into(),
            config_file: None,
            input_path: None,
            output_dir: None,
            resume: None,
            verbose: false,
        }
    }

    /// Command-line arguments for every child
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config_file {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        if self.verbose {
            args.push("--verbose".to_string());
        }
        args.push("run".to_string());
        args.push("--supervised".to_string());
        args.push("--run-id".to_string());
        args.push(self.run_id.clone());
        args
    }

    /// Environment for the child with `ordinal`.
    ///
    /// Case source overrides travel here so they outrank the child's
    /// config file but not its own flags.
    pub fn worker_env(&self, ordinal: usize) -> Vec<(String, String)> {
        let identity = WorkerIdentity {
            ordinal,
            count: self.workers,
        };
        let mut env = EnvBuilder::new()
            .run_id(&self.run_id)
            .worker(identity.tag(), self.workers);
        if let Some(input) = &self.input_path {
            env = env.input_path(input.display().to_string());
        }
        if let Some(output) = &self.output_dir {
            env = env.output_dir(output.display().to_string());
        }
        if let Some(resume) = self.resume {
            env = env.continue_from_last(resume);
        }
        env.into_vars()
    }
}

/// How one child ended
#[derive(Clone, Debug, Serialize)]
pub struct WorkerExit {
    pub worker: String,
    /// `None` when the child was killed by a signal
    pub code: Option<i32>,
}

impl WorkerExit {
    /// The worker finished its pass, whether or not cases failed
    pub fn completed(&self) -> bool {
        matches!(self.code, Some(EXIT_OK) | Some(EXIT_CASES_FAILED))
    }
}

/// Outcome of a launched run
#[derive(Clone, Debug, Serialize)]
pub struct LaunchReport {
    pub run_id: String,
    pub workers: Vec<WorkerExit>,
    #[serde(skip)]
    pub merge: Option<MergeReport>,
    pub session_ended: bool,
}

impl LaunchReport {
    pub fn all_completed(&self) -> bool {
        self.workers.iter().all(WorkerExit::completed)
    }

    pub fn all_passed(&self) -> bool {
        self.workers.iter().all(|w| w.code == Some(EXIT_OK))
    }
}

/// Run every worker as a child process and end the session when all of
/// them completed their pass
pub async fn launch(config: &AppConfig, options: &LaunchOptions) -> Result<LaunchReport> {
    CaseLoader::from_config(config).clear_snapshot(&options.run_id);
    info!(
        "Launching {} worker(s) for run {}",
        options.workers, options.run_id
    );

    let args = options.worker_args();
    let mut children = Vec::with_capacity(options.workers);
    for ordinal in 0..options.workers {
        let child = Command::new(&options.exe)
            .args(&args)
            .envs(options.worker_env(ordinal))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn worker gw{ordinal}"))?;
        children.push(child);
    }

    let statuses = join_all(children.iter_mut().map(|child| child.wait())).await;
    let mut workers = Vec::with_capacity(statuses.len());
    for (ordinal, status) in statuses.into_iter().enumerate() {
        let worker = format!("gw{ordinal}");
        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to wait for worker {}: {}", worker, e);
                None
            }
        };
        info!("Worker {} exited with {:?}", worker, code);
        workers.push(WorkerExit { worker, code });
    }

    let mut report = LaunchReport {
        run_id: options.run_id.clone(),
        workers,
        merge: None,
        session_ended: false,
    };

    if report.all_completed() {
        report.merge = end_session(config, &options.run_id)?;
        report.session_ended = true;
    } else {
        warn!(
            "Not every worker completed; keeping progress of run {} for a resumed launch",
            options.run_id
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::{RUN_ID_VAR, WORKER_COUNT_VAR, WORKER_VAR};

    #[test]
    fn test_worker_args() {
        let mut options = LaunchOptions::new("/usr/bin/agent-harness", 3, "20260301");
        options.config_file = Some(PathBuf::from("agent-harness.yaml"));
        options.output_dir = Some(PathBuf::from("out"));
        options.resume = Some(false);

        assert_eq!(
            options.worker_args(),
            vec![
                "--config",
                "agent-harness.yaml",
                "run",
                "--supervised",
                "--run-id",
                "20260301",
            ]
        );
    }

    #[test]
    fn test_worker_env() {
        let options = LaunchOptions::new("agent-harness", 3, "r7");
        let env = options.worker_env(2);

        assert!(env.contains(&(RUN_ID_VAR.to_string(), "r7".to_string())));
        assert!(env.contains(&(WORKER_VAR.to_string(), "gw2".to_string())));
        assert!(env.contains(&(WORKER_COUNT_VAR.to_string(), "3".to_string())));
        assert_eq!(env.len(), 3);

        let identity = WorkerIdentity::parse(Some("gw2"), Some("3"));
        assert_eq!(identity, WorkerIdentity::new(2, 3).unwrap());
    }

    #[test]
    fn test_worker_env_carries_case_source() {
        let mut options = LaunchOptions::new("agent-harness", 2, "r8");
        options.input_path = Some(PathBuf::from("cases.csv"));
        options.output_dir = Some(PathBuf::from("out"));
        options.resume = Some(false);
        let env = options.worker_env(0);

        assert!(env.contains(&("AGENT_HARNESS_INPUT".to_string(), "cases.csv".to_string())));
        assert!(env.contains(&("AGENT_HARNESS_OUTPUT_DIR".to_string(), "out".to_string())));
        assert!(env.contains(&("AGENT_HARNESS_CONTINUE".to_string(), "false".to_string())));
    }

    #[test]
    fn test_zero_workers_means_one() {
        assert_eq!(LaunchOptions::new("x", 0, "r").workers, 1);
    }

    #[test]
    fn test_session_ends_only_when_all_completed() {
        let exit = |code| WorkerExit {
            worker: "gw0".into(),
            code,
        };
        let report = |codes: Vec<Option<i32>>| LaunchReport {
            run_id: "r".into(),
            workers: codes.into_iter().map(exit).collect(),
            merge: None,
            session_ended: false,
        };

        let mixed = report(vec![Some(EXIT_OK), Some(EXIT_CASES_FAILED)]);
        assert!(mixed.all_completed());
        assert!(!mixed.all_passed());

        assert!(!report(vec![Some(EXIT_OK), Some(EXIT_FATAL)]).all_completed());
        assert!(!report(vec![Some(EXIT_OK), None]).all_completed());
        assert!(report(vec![Some(EXIT_OK)]).all_passed());
    }
}
