//! Tracing setup for processes that run pipelines.
//!
//! Events go to a size-capped file in the logs directory and to stderr,
//! where only warnings show unless the config is verbose. `RUST_LOG`
//! replaces the default directives.

mod rotation;

use anyhow::{Context, Result};
use loadflow_protocol::paths::logs_dir;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::rotation::RotatingFile;

pub const DEFAULT_LOG_FILTER: &str =
    "loadflow=info,loadflow_load=info,loadflow_normalize=info,loadflow_storage=info,loadflow_destination=info";
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_ARCHIVES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log file stem. Characters outside `[A-Za-z0-9_-]` become `_`.
    pub app_name: String,
    pub verbose: bool,
    /// Defaults to `<home>/logs`.
    pub log_dir: Option<PathBuf>,
    pub max_file_size: u64,
    /// Rotated files kept next to the live one.
    pub max_archives: usize,
}

impl LogConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            verbose: false,
            log_dir: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_archives: DEFAULT_MAX_ARCHIVES,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(logs_dir)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir()
            .join(format!("{}.log", sanitize_name(&self.app_name)))
    }
}

/// Install the global subscriber and return the live log file.
///
/// Fails when a subscriber is already installed or `RUST_LOG` does not parse.
pub fn init_logging(config: &LogConfig) -> Result<PathBuf> {
    let log_dir = config.log_dir();
    let file = RotatingFile::open(
        &log_dir,
        &sanitize_name(&config.app_name),
        config.max_file_size,
        config.max_archives,
    )
    .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;
    let log_file = file.path();

    let directives = std::env::var(EnvFilter::DEFAULT_ENV)
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    let file_filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log directives: {}", directives))?;
    let console_filter = EnvFilter::try_new(if config.verbose {
        directives.as_str()
    } else {
        "warn"
    })?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!(log_file = %log_file.display(), "Logging initialized");
    Ok(log_file)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_is_sanitized() {
        let config = LogConfig::new("events pipeline/v1").with_log_dir("/var/log/loadflow");
        assert_eq!(
            config.log_file(),
            PathBuf::from("/var/log/loadflow/events_pipeline_v1.log")
        );
        assert_eq!(sanitize_name("load-01"), "load-01");
    }

    #[test]
    fn test_defaults() {
        let config = LogConfig::new("loadflow");
        assert!(!config.verbose);
        assert_eq!(config.log_dir(), logs_dir());
        assert_eq!(config.max_archives, DEFAULT_MAX_ARCHIVES);
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
