use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{AppError, ResultExt};

#[path = "config.rs"]
mod config;
#[path = "retention.rs"]
mod retention;
#[path = "sanitize.rs"]
mod sanitize;

pub use config::{LogConfig, resolve_log_level};
pub use retention::cleanup_expired_logs;
pub use sanitize::{sanitize_for_log, sanitize_path};

const DEFAULT_KEEP_DAYS: u32 = 7;
const LOG_LEVEL_ENV: &str = "PKGRECV_LOG_LEVEL";
const LOG_FILE_PREFIX: &str = "pkgrecv";
const MAX_STRING_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct LoggingGuard {
    log_dir: PathBuf,
    level: String,
}

impl LoggingGuard {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn level(&self) -> &str {
        &self.level
    }
}

fn worker_guard_slot() -> &'static Mutex<Option<WorkerGuard>> {
    static SLOT: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

pub fn init_logging(data_dir: &Path) -> Result<LoggingGuard, AppError> {
    init_logging_with(data_dir, LogConfig::default())
}

/// Installs the global subscriber: a daily-rolling JSON file under
/// `<data_dir>/logs` plus an optional compact console layer.
///
/// Calling this again after a subscriber is installed only refreshes the
/// retention sweep.
pub fn init_logging_with(data_dir: &Path, config: LogConfig) -> Result<LoggingGuard, AppError> {
    let config = config.normalized();
    let log_dir = data_dir.join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("create log dir: {}", log_dir.display()))
        .with_code("log_dir_create_failed", "Failed to create log directory")
        .with_ctx("logDir", log_dir.display().to_string())?;
    cleanup_expired_logs(&log_dir, config.keep_days)?;

    if tracing::dispatcher::has_been_set() {
        return Ok(LoggingGuard {
            log_dir,
            level: config.min_level,
        });
    }

    let file_appender = RollingBuilder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(&log_dir)
        .with_context(|| format!("create log appender: {}", log_dir.display()))
        .with_code("log_appender_create_failed", "Failed to create log writer")
        .with_ctx("logDir", log_dir.display().to_string())?;
    let (file_writer, worker_guard) = tracing_appender::non_blocking(file_appender);

    if let Ok(mut slot) = worker_guard_slot().lock() {
        *slot = Some(worker_guard);
    }

    let level = config.min_level.clone();
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_current_span(false)
        .with_span_list(false);
    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(true)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(EnvFilter::new(level.clone()))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .with_context(|| format!("init log subscriber: level={level}"))
        .with_code("log_subscriber_init_failed", "Failed to initialise logging")
        .with_ctx("logLevel", level.clone())?;

    tracing::info!(event = "logging_initialized", level = level.as_str());
    Ok(LoggingGuard { log_dir, level })
}

#[cfg(test)]
#[path = "../tests/logging/logging_tests.rs"]
mod tests;
