use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use pkgrecv_logging::sanitize_path;
use walkdir::WalkDir;

use crate::AppResult;
use crate::files::remove_quietly;

const PART_SUFFIX: &str = ".part";

/// Removes `*.part` downloads under `incoming_dir` older than `max_age`,
/// except the ones in `in_use`. Returns how many files were removed.
pub fn sweep_orphaned_downloads(
    incoming_dir: &Path,
    max_age: Duration,
    in_use: &HashSet<PathBuf>,
) -> AppResult<usize> {
    if !incoming_dir.is_dir() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0usize;
    for entry in WalkDir::new(incoming_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file() || in_use.contains(path) {
            continue;
        }
        let is_part = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(PART_SUFFIX));
        if !is_part {
            continue;
        }

        let Some(modified) = entry
            .metadata()
            .ok()
            .and_then(|metadata| metadata.modified().ok())
        else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }

        if remove_quietly(path, "orphan_sweep_remove_failed") {
            removed += 1;
            tracing::info!(
                event = "orphan_download_removed",
                path = %sanitize_path(path),
                age_secs = age.as_secs(),
            );
        }
    }

    Ok(removed)
}

#[cfg(test)]
#[path = "../tests/reception/sweep_tests.rs"]
mod tests;
