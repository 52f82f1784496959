use serde::{Deserialize, Serialize};

use super::{DEFAULT_KEEP_DAYS, LOG_LEVEL_ENV};
use super::sanitize::normalize_level;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub min_level: String,
    pub keep_days: u32,
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            min_level: resolve_log_level(),
            keep_days: DEFAULT_KEEP_DAYS,
            console: cfg!(debug_assertions),
        }
    }
}

impl LogConfig {
    pub fn normalized(mut self) -> Self {
        self.min_level = normalize_level(&self.min_level)
            .map(ToString::to_string)
            .unwrap_or_else(resolve_log_level);
        self.keep_days = self.keep_days.clamp(1, 90);
        self
    }
}

pub fn resolve_log_level() -> String {
    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    if let Some(level) = env_level.as_deref().and_then(normalize_level) {
        return level.to_string();
    }

    if cfg!(debug_assertions) {
        "debug".to_string()
    } else {
        "info".to_string()
    }
}
