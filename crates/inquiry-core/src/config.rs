use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::params::{CallParams, ParamStrategy};
use crate::series::{DEFAULT_LOG_CAPACITY, DEFAULT_SERIES_CAPACITY};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub target: TargetConfig,
    /// Known-good parameters for call #1. Runs refuse to start without them.
    #[serde(default)]
    pub canary: Option<CanaryConfig>,
    pub batch: BatchConfig,
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub updates: UpdateConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the lookup proxy
    pub base_url: String,
    /// Lookup endpoint, joined onto `base_url`
    #[serde(default = "default_path")]
    pub path: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_path() -> String {
    "/api/inquiry".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryConfig {
    pub date_string: String,
    pub nin: String,
}

impl From<&CanaryConfig> for CallParams {
    fn from(canary: &CanaryConfig) -> Self {
        CallParams::new(canary.date_string.clone(), canary.nin.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One call in flight, strict issue order
    #[default]
    Sequential,
    /// Bounded pool, completion order
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of calls per run, canary included
    pub count: u64,
    #[serde(default)]
    pub mode: RunMode,
    /// Pool size in parallel mode
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub params: ParamStrategy,
    /// Seed for reproducible fuzz parameters
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_concurrency() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesConfig {
    pub capacity: usize,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SERIES_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Flush once this many outcomes are pending
    pub flush_threshold: usize,
    /// Flush pending outcomes at least this often
    pub flush_interval_ms: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 10,
            flush_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// How many recent outcomes a run keeps around
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde() {
        let config_str = r#"
[target]
base_url = "http://localhost:3000"
timeout_ms = 5000

[canary]
date_string = "1403-05"
nin = "0012345678"

[batch]
count = 500
mode = "parallel"
concurrency = 20
params = "repeat_canary"
seed = 42

[series]
capacity = 50

[updates]
flush_threshold = 25
flush_interval_ms = 250
        "#;

        let config: Config = toml::from_str(config_str).unwrap();
        assert_eq!(config.target.base_url, "http://localhost:3000");
        assert_eq!(config.target.path, "/api/inquiry");
        assert_eq!(config.target.timeout_ms, 5000);
        let canary = CallParams::from(config.canary.as_ref().unwrap());
        assert_eq!(canary, CallParams::new("1403-05", "0012345678"));
        assert_eq!(config.batch.count, 500);
        assert_eq!(config.batch.mode, RunMode::Parallel);
        assert_eq!(config.batch.concurrency, 20);
        assert_eq!(config.batch.params, ParamStrategy::RepeatCanary);
        assert_eq!(config.batch.seed, Some(42));
        assert_eq!(config.series.capacity, 50);
        assert_eq!(config.updates.flush_threshold, 25);
        assert_eq!(config.log.capacity, DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn test_config_defaults_and_missing_canary() {
        let config_str = r#"
[target]
base_url = "https://lookup.example"

[batch]
count = 10
        "#;

        let config: Config = toml::from_str(config_str).unwrap();
        assert!(config.canary.is_none());
        assert_eq!(config.batch.mode, RunMode::Sequential);
        assert_eq!(config.batch.concurrency, 5);
        assert_eq!(config.batch.params, ParamStrategy::Randomized);
        assert_eq!(config.series.capacity, DEFAULT_SERIES_CAPACITY);
        assert_eq!(config.updates.flush_threshold, 10);
        assert_eq!(config.updates.flush_interval_ms, 500);
        assert_eq!(config.target.timeout_ms, 10_000);
    }
}
