//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Data-driven test harness for conversational agent backends
#[derive(Parser, Debug)]
#[command(name = "agent-harness")]
#[command(version)]
#[command(about = "Run table-driven cases against agent backends across parallel workers")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run this process as one worker
    Run(RunArgs),

    /// Spawn workers as child processes and merge their results
    Launch(LaunchArgs),

    /// Merge per-worker result files
    Merge(MergeArgs),

    /// Show how the case table would be split across workers
    Plan(PlanArgs),

    /// Inspect or modify the resume record
    Record(RecordArgs),

    /// Show or create configuration
    Config(ConfigArgs),
}

/// Options shared by commands that load the case table
#[derive(clap::Args, Debug, Default, Clone)]
pub struct CaseSourceArgs {
    /// Input case table (CSV)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Directory for result files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Continue from the last recorded case
    #[arg(long, conflicts_with = "no_continue")]
    pub continue_from_last: bool,

    /// Start from the first case, ignoring the record
    #[arg(long)]
    pub no_continue: bool,

    /// Run identifier shared by all workers (default: today's date)
    #[arg(long)]
    pub run_id: Option<String>,
}

impl CaseSourceArgs {
    /// Resume override, when either flag was given
    pub fn resume(&self) -> Option<bool> {
        if self.continue_from_last {
            Some(true)
        } else if self.no_continue {
            Some(false)
        } else {
            None
        }
    }
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: CaseSourceArgs,

    /// Worker ordinal (`gw2` or `2`); overrides the environment
    #[arg(long, requires = "workers")]
    pub worker: Option<String>,

    /// Total number of workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Started by `launch`; the launcher ends the session
    #[arg(long, hide = true)]
    pub supervised: bool,
}

/// Arguments for launch command
#[derive(Parser, Debug)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub source: CaseSourceArgs,

    /// Number of worker processes
    #[arg(short, long, default_value = "2")]
    pub workers: usize,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for merge command
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Run date (YYYYMMDD); defaults to today
    #[arg(short, long)]
    pub date: Option<String>,

    /// Directory holding the result files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: CaseSourceArgs,

    /// Number of workers to plan for
    #[arg(short, long, default_value = "2")]
    pub workers: usize,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for record command
#[derive(Parser, Debug)]
pub struct RecordArgs {
    #[command(subcommand)]
    pub action: RecordAction,
}

#[derive(Subcommand, Debug)]
pub enum RecordAction {
    /// Print the next case index to execute
    Show,

    /// Delete the record and published case sets so the next run starts over
    Clear {
        /// Only drop published case sets; the next run still resumes
        #[arg(long)]
        keep_index: bool,
    },

    /// Set the next case index to execute
    Set {
        /// Case index
        index: usize,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write an example configuration file
    Init {
        /// Destination file
        #[arg(default_value = "agent-harness.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List environment variables
    Env,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "agent-harness",
            "run",
            "--input",
            "cases.csv",
            "--no-continue",
            "--worker",
            "gw1",
            "--workers",
            "3",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.source.input, Some(PathBuf::from("cases.csv")));
                assert_eq!(run.source.resume(), Some(false));
                assert_eq!(run.worker.as_deref(), Some("gw1"));
                assert_eq!(run.workers, Some(3));
                assert!(!run.supervised);
                assert_eq!(run.format, "table");
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_resume_flags_conflict() {
        let result = Args::try_parse_from([
            "agent-harness",
            "run",
            "--continue-from-last",
            "--no-continue",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_resume_default_is_unset() {
        let args = Args::parse_from(["agent-harness", "run"]);
        match args.command {
            Command::Run(run) => assert_eq!(run.source.resume(), None),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "agent-harness",
            "launch",
            "--workers",
            "4",
            "--config",
            "h.yaml",
            "-v",
        ]);
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("h.yaml")));
        match args.command {
            Command::Launch(launch) => assert_eq!(launch.workers, 4),
            _ => panic!("Expected Launch command"),
        }
    }

    #[test]
    fn test_record_set() {
        let args = Args::parse_from(["agent-harness", "record", "set", "12"]);
        match args.command {
            Command::Record(RecordArgs {
                action: RecordAction::Set { index },
            }) => assert_eq!(index, 12),
            _ => panic!("Expected Record set"),
        }
    }

    #[test]
    fn test_record_clear_keep_index() {
        let args = Args::parse_from(["agent-harness", "record", "clear", "--keep-index"]);
        match args.command {
            Command::Record(RecordArgs {
                action: RecordAction::Clear { keep_index },
            }) => assert!(keep_index),
            _ => panic!("Expected Record clear"),
        }

        let args = Args::parse_from(["agent-harness", "record", "clear"]);
        match args.command {
            Command::Record(RecordArgs {
                action: RecordAction::Clear { keep_index },
            }) => assert!(!keep_index),
            _ => panic!("Expected Record clear"),
        }
    }

    #[test]
    fn test_launcher_child_args_parse() {
        let args = Args::parse_from([
            "agent-harness",
            "--config",
            "agent-harness.yaml",
            "run",
            "--supervised",
            "--run-id",
            "20260301",
            "--no-continue",
        ]);
        match args.command {
            Command::Run(run) => {
                assert!(run.supervised);
                assert_eq!(run.source.run_id.as_deref(), Some("20260301"));
            }
            _ => panic!("Expected Run command"),
        }
    }
}
