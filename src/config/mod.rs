//! Configuration module
//!
//! Handles loading and managing configuration.

pub mod env;
pub mod file;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use env::{EnvConfig, WorkerIdentity};
pub use file::ConfigFile;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Input case table
    pub input_path: PathBuf,

    /// Directory receiving per-worker and merged result files
    pub output_dir: PathBuf,

    /// Directory holding the resume record and published case sets
    pub cache_dir: PathBuf,

    /// Continue from the last recorded case instead of starting over
    pub continue_from_last: bool,

    /// Case-loading lock settings
    pub lock: LockConfig,

    /// Backend endpoints used by the built-in operations
    pub backends: BackendConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("tests/test_data/cases.csv"),
            output_dir: PathBuf::from("tests/test_results"),
            cache_dir: PathBuf::from("tests/test_cache"),
            continue_from_last: true,
            lock: LockConfig::default(),
            backends: BackendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Apply environment overrides on top of file values
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(input) = &env.input_path {
            self.input_path = PathBuf::from(input);
        }
        if let Some(output) = &env.output_dir {
            self.output_dir = PathBuf::from(output);
        }
        if let Some(cache) = &env.cache_dir {
            self.cache_dir = PathBuf::from(cache);
        }
        if let Some(resume) = env.continue_from_last {
            self.continue_from_last = resume;
        }
        if let Some(level) = &env.log_level {
            self.logging.level = level.clone();
        }
    }
}

/// Cross-process case-loading lock settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Maximum time to wait for the lock
    pub timeout_secs: u64,

    /// Extra wait before reading whatever was published after a lock timeout
    pub fallback_wait_secs: u64,

    /// Delay between acquisition attempts
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            fallback_wait_secs: 5,
            poll_interval_ms: 200,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fallback_wait(&self) -> Duration {
        Duration::from_secs(self.fallback_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Backend endpoints and collaborator policies
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the meet-ask Q&A service
    pub meetask_url: String,

    /// Base URL of the ad pre-processing agent service
    pub adshub_url: String,

    /// Chat-completion endpoint used to generate follow-up questions
    pub llm_url: String,

    /// Chat-completion model name
    pub llm_model: String,

    /// Optional application credentials sent to the completion endpoint
    pub llm_app_id: Option<String>,
    pub llm_app_secret: Option<String>,

    /// Token sent to the ad plan endpoints
    pub adshub_token: Option<String>,

    /// User id the ad agent attributes conversations to
    pub adshub_user_id: u64,

    /// Agent codes of the e-commerce and app ad agents
    pub adshub_ec_agent_code: String,
    pub adshub_app_agent_code: String,

    /// HTTP request timeout
    pub request_timeout_secs: u64,

    /// Upper bound for one case invocation
    pub case_timeout_secs: u64,

    /// Attempts per backend call
    pub retries: u32,

    /// Base delay between attempts; grows linearly per attempt
    pub retry_delay_secs: u64,

    /// Ad plan polling budget
    pub plan_poll_attempts: u32,
    pub plan_poll_interval_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            meetask_url: "http://127.0.0.1:8080".to_string(),
            adshub_url: "http://127.0.0.1:8081".to_string(),
            llm_url: "http://127.0.0.1:8082/v1/chat/completions".to_string(),
            llm_model: "gpt-4o".to_string(),
            llm_app_id: None,
            llm_app_secret: None,
            adshub_token: None,
            adshub_user_id: 2923,
            adshub_ec_agent_code: "PRE_AD_PLACEMENT".to_string(),
            adshub_app_agent_code: "PRE_AD_PLACEMENT_APP".to_string(),
            request_timeout_secs: 180,
            case_timeout_secs: 180,
            retries: 3,
            retry_delay_secs: 2,
            plan_poll_attempts: 60,
            plan_poll_interval_secs: 4,
        }
    }
}

impl BackendConfig {
    pub fn case_timeout(&self) -> Duration {
        Duration::from_secs(self.case_timeout_secs)
    }
}

/// Logging settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Optional file receiving a copy of every log line
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}
