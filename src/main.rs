//! Agent Harness - table-driven test runner for conversational agent backends
//!
//! Reads cases from a CSV table, dispatches each to a named operation, and
//! writes one result file per worker. Several worker processes can share a
//! run: the table is loaded once, the index space is split into contiguous
//! ranges, and every attempted case advances a shared resume record.
//!
//! ## Usage
//!
//! ```bash
//! # Run every case in this process
//! agent-harness run --input tests/test_data/cases.csv
//!
//! # Start over instead of continuing from the record
//! agent-harness run --no-continue
//!
//! # Four worker processes, then merge
//! agent-harness launch --workers 4
//!
//! # Preview the split
//! agent-harness plan --workers 4
//!
//! # Merge today's per-worker files
//! agent-harness merge
//! ```

use anyhow::{bail, Result};
use chrono::Local;
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

mod cases;
mod cli;
mod config;
mod executor;
mod http;
mod models;
mod operations;
mod output;
mod record;
mod results;
mod utils;

use cases::CaseLoader;
use cli::{Args, CaseSourceArgs};
use config::{AppConfig, ConfigFile, EnvConfig, WorkerIdentity};
use executor::{
    end_session, launch, plan, run_worker, LaunchOptions, WorkerOptions, EXIT_CASES_FAILED,
    EXIT_FATAL, EXIT_OK,
};
use operations::default_registry;
use output::{OutputFormat, SummaryFormatter};
use results::ResultMerger;
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = match dispatch(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

/// Effective configuration and where it came from
struct Resolved {
    config: AppConfig,
    config_path: Option<PathBuf>,
    env: EnvConfig,
}

/// Defaults < config file < environment; CLI flags are applied per command
fn resolve_config(explicit: Option<&Path>) -> Result<Resolved> {
    let env = EnvConfig::load();
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let (file, config_path) = ConfigFile::discover(explicit.as_deref())?;

    let mut config = file.app;
    config.apply_env(&env);
    Ok(Resolved {
        config,
        config_path,
        env,
    })
}

fn apply_source(config: &mut AppConfig, source: &CaseSourceArgs) {
    if let Some(input) = &source.input {
        config.input_path = input.clone();
    }
    if let Some(output) = &source.output_dir {
        config.output_dir = output.clone();
    }
    if let Some(resume) = source.resume() {
        config.continue_from_last = resume;
    }
}

fn run_id_or(source: &CaseSourceArgs, env: &EnvConfig, fallback: impl FnOnce() -> String) -> String {
    source
        .run_id
        .clone()
        .or_else(|| env.run_id.clone())
        .unwrap_or_else(fallback)
}

fn formatter(format: &str) -> SummaryFormatter {
    let formatter = SummaryFormatter::new(OutputFormat::from_str(format).unwrap_or(OutputFormat::Table));
    if std::io::stdout().is_terminal() {
        formatter
    } else {
        formatter.no_color()
    }
}

async fn dispatch(args: Args) -> Result<i32> {
    let Resolved {
        mut config,
        config_path,
        env,
    } = resolve_config(args.config.as_deref())?;

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::from_str(&config.logging.level).unwrap_or(LogLevel::Info)
    };
    init_logger(level, config.logging.file.as_deref())?;
    if let Some(path) = &config_path {
        info!("Using configuration {}", path.display());
    }

    match args.command {
        cli::Command::Run(run_args) => {
            apply_source(&mut config, &run_args.source);
            run_command(&config, &env, run_args).await
        }
        cli::Command::Launch(launch_args) => {
            apply_source(&mut config, &launch_args.source);
            launch_command(&config, &env, config_path, args.verbose, launch_args).await
        }
        cli::Command::Merge(merge_args) => merge_command(&config, merge_args),
        cli::Command::Plan(plan_args) => {
            apply_source(&mut config, &plan_args.source);
            plan_command(&config, &env, plan_args)
        }
        cli::Command::Record(record_args) => record_command(&config, record_args),
        cli::Command::Config(config_args) => {
            config_command(&config, config_path.as_deref(), &env, config_args)
        }
    }
}

async fn run_command(config: &AppConfig, env: &EnvConfig, args: cli::RunArgs) -> Result<i32> {
    let identity = match &args.worker {
        Some(token) => {
            let count = args.workers.map(|n| n.to_string());
            WorkerIdentity::parse(Some(token), count.as_deref())
        }
        None => WorkerIdentity::from_env(),
    };
    let run_id = run_id_or(&args.source, env, results::today);
    let registry = Arc::new(default_registry(&config.backends)?);
    info!(
        "Run {} as worker {} of {} with operations {:?}",
        run_id,
        identity.tag(),
        identity.count,
        registry.names()
    );

    let options = WorkerOptions::from_config(config, &run_id, identity);
    let summary = match run_worker(&options, registry).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("{:#}", e);
            return Ok(EXIT_FATAL);
        }
    };

    let formatter = formatter(&args.format);
    if let Some(summary) = &summary {
        println!("{}", formatter.format_summary(summary));
    }

    if identity.is_single() && !args.supervised {
        if let Some(merge) = end_session(config, &run_id)? {
            if OutputFormat::from_str(&args.format).unwrap_or(OutputFormat::Table)
                == OutputFormat::Table
            {
                print!("{}", formatter.format_merge(&merge));
            }
        }
    }

    Ok(match summary {
        Some(summary) if !summary.is_all_passed() => EXIT_CASES_FAILED,
        _ => EXIT_OK,
    })
}

async fn launch_command(
    config: &AppConfig,
    env: &EnvConfig,
    config_path: Option<PathBuf>,
    verbose: bool,
    args: cli::LaunchArgs,
) -> Result<i32> {
    let run_id = run_id_or(&args.source, env, || {
        Local::now().format("%Y%m%d_%H%M%S").to_string()
    });

    let mut options = LaunchOptions::new(std::env::current_exe()?, args.workers, run_id);
    options.config_file = config_path;
    options.input_path = args.source.input.clone();
    options.output_dir = args.source.output_dir.clone();
    options.resume = args.source.resume();
    options.verbose = verbose;

    let report = launch(config, &options).await?;
    println!("{}", formatter(&args.format).format_launch(&report));

    Ok(if report.all_passed() {
        EXIT_OK
    } else if report.all_completed() {
        EXIT_CASES_FAILED
    } else {
        EXIT_FATAL
    })
}

fn merge_command(config: &AppConfig, args: cli::MergeArgs) -> Result<i32> {
    let output_dir = args.output_dir.unwrap_or_else(|| config.output_dir.clone());
    let date = args.date.unwrap_or_else(results::today);
    if date.len() != 8 || !date.chars().all(|c| c.is_ascii_digit()) {
        bail!("Invalid date '{date}', expected YYYYMMDD");
    }

    match ResultMerger::new(&output_dir).merge(&date)? {
        Some(merge) => print!("{}", formatter(&args.format).format_merge(&merge)),
        None => println!("No result files for {} in {}", date, output_dir.display()),
    }
    Ok(EXIT_OK)
}

fn plan_command(config: &AppConfig, env: &EnvConfig, args: cli::PlanArgs) -> Result<i32> {
    let run_id = run_id_or(&args.source, env, results::today);
    let set = CaseLoader::from_config(config).load_local(&run_id, config.continue_from_last)?;
    let entries = plan(&set, args.workers);
    println!(
        "{}",
        formatter(&args.format).format_plan(&run_id, set.total_count, &entries)
    );
    Ok(EXIT_OK)
}

fn record_command(config: &AppConfig, args: cli::RecordArgs) -> Result<i32> {
    let loader = CaseLoader::from_config(config);
    let record = loader.record();

    match args.action {
        cli::RecordAction::Show => {
            println!("Record: {}", record.path().display());
            println!("Next case index: {}", record.load());
        }
        cli::RecordAction::Clear { keep_index } => {
            let removed = loader.clear_all_snapshots();
            println!("✓ Removed {removed} published case set(s)");
            if !keep_index {
                record.clear();
                println!("✓ Record cleared: {}", record.path().display());
            }
        }
        cli::RecordAction::Set { index } => {
            record.save(index)?;
            println!("✓ Next case index set to {index}");
        }
    }
    Ok(EXIT_OK)
}

fn config_command(
    config: &AppConfig,
    config_path: Option<&Path>,
    env: &EnvConfig,
    args: cli::ConfigArgs,
) -> Result<i32> {
    match args.action {
        cli::ConfigAction::Show => {
            match config_path {
                Some(path) => println!("# Loaded from {}", path.display()),
                None => println!("# No configuration file found, using defaults"),
            }
            let file = ConfigFile {
                app: config.clone(),
                ..ConfigFile::default()
            };
            println!("{}", serde_yaml::to_string(&file)?);
            if env.has_any() {
                env.print_summary();
            }
        }

        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }
            ConfigFile::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to point at your backends.");
        }

        cli::ConfigAction::Env => {
            config::env::print_env_help();
        }
    }
    Ok(EXIT_OK)
}
