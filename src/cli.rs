// src/cli.rs
use clap::Parser;

use crate::ct_log::normalize_log_url;

/// ct-mirror: Certificate Transparency log mirror
///
/// Copies every entry of one or more CT logs into a normalized,
/// deduplicated PostgreSQL database and keeps following the log heads.
#[derive(Parser, Debug, Clone)]
#[command(name = "ct-mirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// CT log base URLs to mirror (https only)
    #[arg(value_name = "LOGS")]
    pub logs: Vec<String>,

    // ===== Configuration =====
    /// Path to TOML config file
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,

    /// PostgreSQL connection string
    #[arg(short = 'd', long = "database-url", env = "CT_MIRROR_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Address for the Prometheus metrics endpoint
    #[arg(long = "metrics-addr")]
    pub metrics_addr: Option<String>,

    // ===== Performance =====
    /// Concurrent window fetches per log
    #[arg(long = "fetch-workers")]
    pub fetch_workers: Option<usize>,

    /// Entries per window (one database transaction each)
    #[arg(long = "window-size")]
    pub window_size: Option<u64>,

    // ===== Logging =====
    /// Verbose logging (set log level to debug)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet logging (set log level to warn)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl Cli {
    /// Validate flag combinations and return errors for invalid usage
    pub fn validate(&self) -> anyhow::Result<()> {
        for log in &self.logs {
            normalize_log_url(log)?;
        }

        if self.fetch_workers == Some(0) {
            anyhow::bail!("--fetch-workers must be greater than 0");
        }

        if self.window_size == Some(0) {
            anyhow::bail!("--window-size must be greater than 0");
        }

        // Verbose and quiet are mutually exclusive
        if self.verbose && self.quiet {
            anyhow::bail!("Cannot specify both --verbose and --quiet");
        }

        Ok(())
    }

    /// Log level forced by verbose/quiet flags, if any
    pub fn log_level(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("warn")
        } else {
            None
        }
    }
}
