use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use pkgrecv_logging::sanitize_path;
use serde::{Deserialize, Serialize};

use crate::files::write_atomic;
use crate::{AppError, AppResult};

pub const PROGRESS_INTERVAL_MS_DEFAULT: u32 = 1_000;
pub const PROGRESS_INTERVAL_MS_MIN: u32 = 50;
pub const PROGRESS_INTERVAL_MS_MAX: u32 = 60_000;
pub const SPEED_WINDOW_DEFAULT: u32 = 5;
pub const SPEED_WINDOW_MIN: u32 = 1;
pub const SPEED_WINDOW_MAX: u32 = 50;
pub const MAX_RENAME_ATTEMPTS_DEFAULT: u32 = 200;
pub const MAX_RENAME_ATTEMPTS_MIN: u32 = 1;
pub const MAX_RENAME_ATTEMPTS_MAX: u32 = 10_000;
pub const TICKER_MAX_LEN_DEFAULT: u32 = 20;
pub const TICKER_MAX_LEN_MIN: u32 = 8;
pub const TICKER_MAX_LEN_MAX: u32 = 128;
pub const ORPHAN_MAX_AGE_HOURS_DEFAULT: u32 = 24;
pub const ORPHAN_MAX_AGE_HOURS_MIN: u32 = 1;
pub const ORPHAN_MAX_AGE_HOURS_MAX: u32 = 720;

const DEFAULT_DATA_DIR_NAME: &str = "pkgrecv";
const INCOMING_DIR_NAME: &str = "incoming";
const PACKAGE_DIR_NAME: &str = "packages";
const EXTRACT_DIR_NAME: &str = "extracted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceptionSettings {
    /// Where in-flight downloads are written.
    pub incoming_dir: PathBuf,
    /// Where kept packages are saved.
    pub package_dir: PathBuf,
    /// Working root for package extraction.
    pub extract_root: PathBuf,
    pub progress_interval_ms: u32,
    pub speed_window: u32,
    pub max_rename_attempts: u32,
    pub ticker_max_len: u32,
    pub orphan_max_age_hours: u32,
}

impl Default for ReceptionSettings {
    fn default() -> Self {
        Self::with_data_dir(std::env::temp_dir().join(DEFAULT_DATA_DIR_NAME))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceptionSettingsUpdate {
    pub incoming_dir: Option<String>,
    pub package_dir: Option<String>,
    pub extract_root: Option<String>,
    pub progress_interval_ms: Option<u32>,
    pub speed_window: Option<u32>,
    pub max_rename_attempts: Option<u32>,
    pub ticker_max_len: Option<u32>,
    pub orphan_max_age_hours: Option<u32>,
}

fn patch_dir(target: &mut PathBuf, value: Option<&String>, field: &'static str) -> AppResult<()> {
    let Some(value) = value else {
        return Ok(());
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(
            AppError::new("settings_dir_invalid", "Directory setting must not be empty")
                .with_context("field", field),
        );
    }
    *target = PathBuf::from(trimmed);
    Ok(())
}

impl ReceptionSettings {
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            incoming_dir: data_dir.join(INCOMING_DIR_NAME),
            package_dir: data_dir.join(PACKAGE_DIR_NAME),
            extract_root: data_dir.join(EXTRACT_DIR_NAME),
            progress_interval_ms: PROGRESS_INTERVAL_MS_DEFAULT,
            speed_window: SPEED_WINDOW_DEFAULT,
            max_rename_attempts: MAX_RENAME_ATTEMPTS_DEFAULT,
            ticker_max_len: TICKER_MAX_LEN_DEFAULT,
            orphan_max_age_hours: ORPHAN_MAX_AGE_HOURS_DEFAULT,
        }
    }

    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.incoming_dir.as_os_str().is_empty() {
            self.incoming_dir = defaults.incoming_dir;
        }
        if self.package_dir.as_os_str().is_empty() {
            self.package_dir = defaults.package_dir;
        }
        if self.extract_root.as_os_str().is_empty() {
            self.extract_root = defaults.extract_root;
        }
        self.progress_interval_ms = self
            .progress_interval_ms
            .clamp(PROGRESS_INTERVAL_MS_MIN, PROGRESS_INTERVAL_MS_MAX);
        self.speed_window = self.speed_window.clamp(SPEED_WINDOW_MIN, SPEED_WINDOW_MAX);
        self.max_rename_attempts = self
            .max_rename_attempts
            .clamp(MAX_RENAME_ATTEMPTS_MIN, MAX_RENAME_ATTEMPTS_MAX);
        self.ticker_max_len = self
            .ticker_max_len
            .clamp(TICKER_MAX_LEN_MIN, TICKER_MAX_LEN_MAX);
        self.orphan_max_age_hours = self
            .orphan_max_age_hours
            .clamp(ORPHAN_MAX_AGE_HOURS_MIN, ORPHAN_MAX_AGE_HOURS_MAX);
        self
    }

    /// Reads settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = match fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tracing::info!(event = "settings_defaults_used", path = %sanitize_path(path));
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(
                    AppError::new("settings_read_failed", "Failed to read reception settings")
                        .with_source(error)
                        .with_context("path", sanitize_path(path)),
                );
            }
        };

        let parsed = serde_json::from_str::<Self>(&content).map_err(|error| {
            AppError::new("settings_parse_failed", "Reception settings file is malformed")
                .with_source(error)
                .with_context("path", sanitize_path(path))
        })?;
        Ok(parsed.normalized())
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        let serialized = serde_json::to_vec_pretty(self).map_err(|error| {
            AppError::new("settings_serialize_failed", "Failed to serialize reception settings")
                .with_source(error)
        })?;
        write_atomic(path, &serialized, "settings_write_failed")
    }

    /// Applies a partial update. Nothing changes when any field is rejected.
    pub fn apply_update(&mut self, update: &ReceptionSettingsUpdate) -> AppResult<()> {
        let mut next = self.clone();
        patch_dir(&mut next.incoming_dir, update.incoming_dir.as_ref(), "incomingDir")?;
        patch_dir(&mut next.package_dir, update.package_dir.as_ref(), "packageDir")?;
        patch_dir(&mut next.extract_root, update.extract_root.as_ref(), "extractRoot")?;
        if let Some(value) = update.progress_interval_ms {
            next.progress_interval_ms = value;
        }
        if let Some(value) = update.speed_window {
            next.speed_window = value;
        }
        if let Some(value) = update.max_rename_attempts {
            next.max_rename_attempts = value;
        }
        if let Some(value) = update.ticker_max_len {
            next.ticker_max_len = value;
        }
        if let Some(value) = update.orphan_max_age_hours {
            next.orphan_max_age_hours = value;
        }

        *self = next.normalized();
        Ok(())
    }

    pub fn ensure_dirs(&self) -> AppResult<()> {
        for dir in [&self.incoming_dir, &self.package_dir, &self.extract_root] {
            fs::create_dir_all(dir).map_err(|error| {
                AppError::new("settings_dir_create_failed", "Failed to create reception directory")
                    .with_source(error)
                    .with_context("path", sanitize_path(dir))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/reception/settings_tests.rs"]
mod tests;
