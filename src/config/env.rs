//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration and the worker
//! identity supplied by whatever launched this process.

use std::env;
use tracing::warn;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "AGENT_HARNESS";

/// Worker ordinal token, e.g. `gw2` or `2`
pub const WORKER_VAR: &str = "AGENT_HARNESS_WORKER";

/// Total number of workers in the run
pub const WORKER_COUNT_VAR: &str = "AGENT_HARNESS_WORKER_COUNT";

/// Run identifier shared by all workers of one run
pub const RUN_ID_VAR: &str = "AGENT_HARNESS_RUN_ID";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Input table from AGENT_HARNESS_INPUT
    pub input_path: Option<String>,
    /// Output directory from AGENT_HARNESS_OUTPUT_DIR
    pub output_dir: Option<String>,
    /// Cache directory from AGENT_HARNESS_CACHE_DIR
    pub cache_dir: Option<String>,
    /// Resume switch from AGENT_HARNESS_CONTINUE
    pub continue_from_last: Option<bool>,
    /// Config file from AGENT_HARNESS_CONFIG
    pub config_file: Option<String>,
    /// Run id from AGENT_HARNESS_RUN_ID
    pub run_id: Option<String>,
    /// Log level from AGENT_HARNESS_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            input_path: get_env("INPUT"),
            output_dir: get_env("OUTPUT_DIR"),
            cache_dir: get_env("CACHE_DIR"),
            continue_from_last: get_env_bool("CONTINUE"),
            config_file: get_env("CONFIG"),
            run_id: get_env("RUN_ID"),
            log_level: get_env("LOG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.input_path.is_some()
            || self.output_dir.is_some()
            || self.cache_dir.is_some()
            || self.continue_from_last.is_some()
            || self.config_file.is_some()
            || self.run_id.is_some()
            || self.log_level.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_INPUT:        {:?}", ENV_PREFIX, self.input_path);
        println!("  {}_OUTPUT_DIR:   {:?}", ENV_PREFIX, self.output_dir);
        println!("  {}_CACHE_DIR:    {:?}", ENV_PREFIX, self.cache_dir);
        println!("  {}_CONTINUE:     {:?}", ENV_PREFIX, self.continue_from_last);
        println!("  {}_CONFIG:       {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_RUN_ID:       {:?}", ENV_PREFIX, self.run_id);
        println!("  {}_LOG:          {:?}", ENV_PREFIX, self.log_level);
        println!("  {}:       {:?}", WORKER_VAR, env::var(WORKER_VAR).ok());
        println!("  {}: {:?}", WORKER_COUNT_VAR, env::var(WORKER_COUNT_VAR).ok());
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Position of this process among the cooperating workers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub ordinal: usize,
    pub count: usize,
}

impl WorkerIdentity {
    /// The whole run in one process
    pub fn single() -> Self {
        Self {
            ordinal: 0,
            count: 1,
        }
    }

    /// Validated constructor; `None` when the ordinal is out of range
    pub fn new(ordinal: usize, count: usize) -> Option<Self> {
        (count > 0 && ordinal < count).then_some(Self { ordinal, count })
    }

    /// Parse raw ordinal/count tokens, falling back to a single worker.
    ///
    /// The ordinal accepts `gw<N>` or a bare number.
    pub fn parse(worker: Option<&str>, count: Option<&str>) -> Self {
        let Some(worker) = worker.map(str::trim).filter(|w| !w.is_empty()) else {
            return Self::single();
        };

        let ordinal = worker
            .strip_prefix("gw")
            .unwrap_or(worker)
            .parse::<usize>()
            .ok();
        let count = count.and_then(|c| c.trim().parse::<usize>().ok()).unwrap_or(1);

        match ordinal.and_then(|o| Self::new(o, count)) {
            Some(identity) => identity,
            None => {
                warn!(
                    "Malformed worker identity (worker={:?}, count={}), running as single worker",
                    worker, count
                );
                Self::single()
            }
        }
    }

    /// Read the identity from the process environment
    pub fn from_env() -> Self {
        let worker = env::var(WORKER_VAR).ok();
        let count = env::var(WORKER_COUNT_VAR).ok();
        Self::parse(worker.as_deref(), count.as_deref())
    }

    /// Short tag used in file names and log lines
    pub fn tag(&self) -> String {
        format!("gw{}", self.ordinal)
    }

    pub fn is_single(&self) -> bool {
        self.count == 1
    }
}

impl Default for WorkerIdentity {
    fn default() -> Self {
        Self::single()
    }
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set input table path
    pub fn input_path(mut self, path: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_INPUT"), path.into()));
        self
    }

    /// Set output directory
    pub fn output_dir(mut self, dir: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_OUTPUT_DIR"), dir.into()));
        self
    }

    /// Set resume switch
    pub fn continue_from_last(mut self, resume: bool) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_CONTINUE"), resume.to_string()));
        self
    }

    /// Set run id
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.vars.push((RUN_ID_VAR.to_string(), run_id.into()));
        self
    }

    /// Set worker ordinal token and count
    pub fn worker(mut self, token: impl Into<String>, count: usize) -> Self {
        self.vars.push((WORKER_VAR.to_string(), token.into()));
        self.vars
            .push((WORKER_COUNT_VAR.to_string(), count.to_string()));
        self
    }

    /// The collected variables, for handing to a child process
    pub fn into_vars(self) -> Vec<(String, String)> {
        self.vars
    }

    /// Apply environment variables
    #[cfg(test)]
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    #[cfg(test)]
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all AGENT_HARNESS environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_INPUT          Input case table (CSV)");
    println!("  {ENV_PREFIX}_OUTPUT_DIR     Directory for result files");
    println!("  {ENV_PREFIX}_CACHE_DIR      Directory for the resume record and case snapshots");
    println!("  {ENV_PREFIX}_CONTINUE       Resume from the last recorded case (true/false)");
    println!("  {ENV_PREFIX}_CONFIG         Path to configuration file");
    println!("  {ENV_PREFIX}_RUN_ID         Run identifier shared by all workers");
    println!("  {ENV_PREFIX}_LOG            Log level (trace, debug, info, warn, error)");
    println!("  {WORKER_VAR}         Worker ordinal (gw0, gw1, ... or 0, 1, ...)");
    println!("  {WORKER_COUNT_VAR}   Total number of workers");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_INPUT=tests/test_data/cases.csv");
    println!("  export {WORKER_VAR}=gw1 {WORKER_COUNT_VAR}=4");
    println!("  agent-harness run");
}
