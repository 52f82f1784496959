use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use pkgrecv_logging::sanitize_path;

use crate::{AppError, AppResult};

/// Writes `content` next to `path` and renames it into place, falling back
/// to copy when the rename is refused (e.g. across volumes).
pub(crate) fn write_atomic(path: &Path, content: &[u8], code: &'static str) -> AppResult<()> {
    let parent = path.parent().ok_or_else(|| {
        AppError::new(code, "Failed to write file")
            .with_context("path", sanitize_path(path))
            .with_cause("path has no parent directory")
    })?;
    fs::create_dir_all(parent).map_err(|error| {
        AppError::new(code, "Failed to create directory")
            .with_source(error)
            .with_context("path", sanitize_path(parent))
    })?;

    let temp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&temp_path, content).map_err(|error| {
        AppError::new(code, "Failed to write temporary file")
            .with_source(error)
            .with_context("path", sanitize_path(&temp_path))
    })?;

    if let Err(rename_error) = fs::rename(&temp_path, path) {
        let copied = fs::copy(&temp_path, path);
        remove_quietly(&temp_path, "atomic_write_temp_cleanup_failed");
        copied.map_err(|error| {
            AppError::new(code, "Failed to replace file")
                .with_source(error)
                .with_context("path", sanitize_path(path))
                .with_context("renameError", rename_error.to_string())
        })?;
    }
    Ok(())
}

/// Removes a file, treating "already gone" as success. Failures are logged
/// under `event` and reported as `false`.
pub(crate) fn remove_quietly(path: &Path, event: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(error) if error.kind() == ErrorKind::NotFound => true,
        Err(error) => {
            tracing::warn!(event = event, path = %sanitize_path(path), detail = %error);
            false
        }
    }
}

pub(crate) fn remove_dir_quietly(path: &Path, event: &'static str) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(error) if error.kind() == ErrorKind::NotFound => true,
        Err(error) => {
            tracing::warn!(event = event, path = %sanitize_path(path), detail = %error);
            false
        }
    }
}

/// Moves `from` to `to`, copying and deleting when a rename is not possible.
pub(crate) fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
