use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Context;

use crate::{AppError, ResultExt};

pub(crate) fn cleanup_expired_logs_with_duration(
    log_dir: &Path,
    keep_duration: Duration,
    now: SystemTime,
) -> Result<usize, AppError> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let entries = fs::read_dir(log_dir)
        .with_context(|| format!("read log dir: {}", log_dir.display()))
        .with_code("log_cleanup_read_dir_failed", "Failed to read log directory")
        .with_ctx("logDir", log_dir.display().to_string())?;

    let mut removed = 0usize;
    for entry in entries {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let modified_at = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .with_context(|| format!("read log modified time: {}", path.display()))
            .with_code("log_cleanup_metadata_failed", "Failed to read log metadata")
            .with_ctx("logPath", path.display().to_string())?;

        let elapsed = now.duration_since(modified_at).unwrap_or_default();
        if elapsed <= keep_duration {
            continue;
        }

        fs::remove_file(&path)
            .with_context(|| format!("remove expired log: {}", path.display()))
            .with_code("log_cleanup_remove_failed", "Failed to remove expired log")
            .with_ctx("logPath", path.display().to_string())?;
        removed += 1;
    }

    Ok(removed)
}

pub fn cleanup_expired_logs(log_dir: &Path, keep_days: u32) -> Result<usize, AppError> {
    let keep_duration = Duration::from_secs(u64::from(keep_days).saturating_mul(24 * 60 * 60));
    cleanup_expired_logs_with_duration(log_dir, keep_duration, SystemTime::now())
}
