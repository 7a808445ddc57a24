//! Server configuration.
//!
//! Defaults in code, overridable by environment variables (loaded through
//! `.env` via dotenvy in `main`) and an optional YAML file. Environment
//! wins over YAML, YAML over defaults.

use std::path::PathBuf;
use std::time::Duration;

use nodeflow_executor::{ExecutorConfig, RateLimitConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub api_prefix: String,
    /// Directory of flow JSON files loaded into the catalog at boot.
    pub flows_dir: Option<PathBuf>,
    pub idle_timeout_secs: u64,
    pub alarm_interval_secs: u64,
    pub rate_limit_requests: u64,
    pub rate_limit_window_ms: i64,
    pub max_debug: usize,
    pub max_logs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            api_prefix: "/api".to_string(),
            flows_dir: None,
            idle_timeout_secs: 3600,
            alarm_interval_secs: 60,
            rate_limit_requests: 60,
            rate_limit_window_ms: 60_000,
            max_debug: 1000,
            max_logs: 100,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Load(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "config load error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Defaults, then the YAML file named by `NODEFLOW_CONFIG` (if any),
    /// then `NODEFLOW_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("NODEFLOW_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::Load(format!("{path}: {e}")))?;
                Self::from_yaml(&text)?
            }
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))
    }

    fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("NODEFLOW_BIND") {
            self.bind = bind;
        }
        if let Ok(prefix) = std::env::var("NODEFLOW_API_PREFIX") {
            self.api_prefix = prefix;
        }
        if let Ok(dir) = std::env::var("NODEFLOW_FLOWS_DIR") {
            self.flows_dir = Some(PathBuf::from(dir));
        }
        if let Ok(Ok(secs)) = std::env::var("NODEFLOW_IDLE_TIMEOUT_SECS").map(|v| v.parse()) {
            self.idle_timeout_secs = secs;
        }
        if let Ok(Ok(n)) = std::env::var("NODEFLOW_RATE_LIMIT_REQUESTS").map(|v| v.parse()) {
            self.rate_limit_requests = n;
        }
        if let Ok(Ok(ms)) = std::env::var("NODEFLOW_RATE_LIMIT_WINDOW_MS").map(|v| v.parse()) {
            self.rate_limit_window_ms = ms;
        }
    }

    /// Project onto the executor's tunables.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            api_prefix: self.api_prefix.clone(),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            alarm_interval: Duration::from_secs(self.alarm_interval_secs),
            max_debug: self.max_debug,
            max_logs: self.max_logs,
            rate_limit: RateLimitConfig {
                requests: self.rate_limit_requests,
                window_ms: self.rate_limit_window_ms,
            },
            ..ExecutorConfig::default()
        }
    }
}
