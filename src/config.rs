// src/config.rs

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cli::Cli;
use crate::ct_log::normalize_log_url;
use crate::mirror::{CoordinatorConfig, FetcherConfig, PlannerConfig};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_failure_backoff")]
    pub failure_backoff_secs: u64,
    /// Merged with the positional log arguments
    #[serde(default)]
    pub logs: Vec<String>,
}

fn default_window_size() -> u64 { 1000 }
fn default_queue_capacity() -> usize { 20 }
fn default_fetch_workers() -> usize { 4 }
fn default_fetch_retries() -> u32 { 3 }
fn default_poll_interval() -> u64 { 10 }
fn default_max_poll_interval() -> u64 { 300 }
fn default_failure_threshold() -> u32 { 3 }
fn default_failure_backoff() -> u64 { 5 }

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            queue_capacity: default_queue_capacity(),
            fetch_workers: default_fetch_workers(),
            fetch_retries: default_fetch_retries(),
            poll_interval_secs: default_poll_interval(),
            max_poll_interval_secs: default_max_poll_interval(),
            failure_threshold: default_failure_threshold(),
            failure_backoff_secs: default_failure_backoff(),
            logs: Vec::new(),
        }
    }
}

impl MirrorConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let poll_interval = Duration::from_secs(self.poll_interval_secs);
        CoordinatorConfig {
            queue_capacity: self.queue_capacity,
            fetcher: FetcherConfig {
                planner: PlannerConfig {
                    window_size: self.window_size,
                    poll_interval,
                    max_poll_interval: Duration::from_secs(self.max_poll_interval_secs)
                        .max(poll_interval),
                },
                workers: self.fetch_workers,
                failure_threshold: self.failure_threshold,
                failure_backoff: Duration::from_secs(self.failure_backoff_secs),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgresql://localhost/ctmirror".to_string()
}

fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_enabled() -> bool { true }
fn default_listen_addr() -> String { "0.0.0.0:2112".to_string() }
fn default_metrics_path() -> String { "/metrics".to_string() }

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen_addr: default_listen_addr(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Load the file named on the command line (if any) and apply CLI overrides
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(Path::new(path))?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// CLI values win over file values; positional logs come first
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.database_url {
            self.database.url = url.clone();
        }
        if let Some(addr) = &cli.metrics_addr {
            self.metrics.listen_addr = addr.clone();
        }
        if let Some(workers) = cli.fetch_workers {
            self.mirror.fetch_workers = workers;
        }
        if let Some(window_size) = cli.window_size {
            self.mirror.window_size = window_size;
        }
        if !cli.logs.is_empty() {
            let mut logs = cli.logs.clone();
            logs.append(&mut self.mirror.logs);
            self.mirror.logs = logs;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mirror.logs.is_empty() {
            anyhow::bail!("no CT logs given: pass log URLs as arguments or set [mirror] logs");
        }
        if self.mirror.window_size == 0 {
            anyhow::bail!("window_size must be greater than 0");
        }
        if self.mirror.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }
        if self.mirror.fetch_workers == 0 {
            anyhow::bail!("fetch_workers must be greater than 0");
        }
        for log in &self.mirror.logs {
            normalize_log_url(log)?;
        }
        Ok(())
    }

    /// Normalised, deduplicated log URLs in the order given
    pub fn log_urls(&self) -> anyhow::Result<Vec<String>> {
        let mut urls: Vec<String> = Vec::new();
        for log in &self.mirror.logs {
            let url = normalize_log_url(log)?;
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(urls)
    }
}
