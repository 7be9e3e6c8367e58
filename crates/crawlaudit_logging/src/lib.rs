//! Logging for crawl runs.
//!
//! Each catalog logs into its own directory with one file per day
//! (`<app>.YYYY-MM-DD.log`), so successive cron runs append to the same file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "crawlaudit=info,crawlaudit_db=warn";

/// Where and how a crawl run logs.
#[derive(Debug, Clone)]
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Directory holding the day files.
    pub log_dir: PathBuf,
    /// Day files kept, today included. 0 keeps all of them.
    pub retention_days: u32,
}

/// Flushes buffered file output when dropped. Hold it for the whole run.
#[must_use]
pub struct LogGuard {
    _file: WorkerGuard,
}

/// Install the day-file layer and the stderr layer.
///
/// `RUST_LOG` overrides the file filter. Stderr only shows warnings unless
/// `verbose` is set.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let appender = day_appender(&config.log_dir, config.app_name, config.retention_days)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new(DEFAULT_LOG_FILTER)
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(LogGuard { _file: guard })
}

/// Daily appender for `app_name` in `dir`, pruned to `retention_days` files.
pub fn day_appender(dir: &Path, app_name: &str, retention_days: u32) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(app_name)
        .filename_suffix("log");
    if retention_days > 0 {
        builder = builder.max_log_files(retention_days as usize);
    }
    builder
        .build(dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

/// Get the crawlaudit home directory: ~/.crawlaudit
pub fn crawlaudit_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("CRAWLAUDIT_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".crawlaudit")
}
