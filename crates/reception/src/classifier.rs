use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use pkgrecv_logging::sanitize_path;

use crate::models::SingleEvent;
use crate::{AppError, AppResult, ResultExt};

const ZIP_LOCAL_HEADER: [u8; 4] = *b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: [u8; 4] = *b"PK\x05\x06";
pub const MAX_EVENT_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ContentClass {
    Archive,
    SingleEvent(SingleEvent),
}

impl ContentClass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::SingleEvent(_) => "single_event",
        }
    }
}

/// Decides what a verified payload is. The transport never says.
#[derive(Debug, Clone, Copy)]
pub struct ContentClassifier {
    max_event_bytes: u64,
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self {
            max_event_bytes: MAX_EVENT_BYTES,
        }
    }
}

fn unrecognized(path: &Path, reason: &str) -> AppError {
    AppError::new(
        "classify_unrecognized_content",
        "Received content is neither a package nor an event",
    )
    .with_context("path", sanitize_path(path))
    .with_cause(reason)
}

impl ContentClassifier {
    pub fn classify(&self, path: &Path) -> AppResult<ContentClass> {
        if is_archive(path)? {
            return Ok(ContentClass::Archive);
        }

        let size = std::fs::metadata(path)
            .with_context(|| format!("stat payload: {}", path.display()))
            .with_code("classify_read_failed", "Failed to read received content")
            .with_ctx("path", sanitize_path(path))?
            .len();
        if size > self.max_event_bytes {
            return Err(unrecognized(path, "payload too large for an event"));
        }

        let content = std::fs::read(path)
            .with_context(|| format!("read payload: {}", path.display()))
            .with_code("classify_read_failed", "Failed to read received content")
            .with_ctx("path", sanitize_path(path))?;
        let event = serde_json::from_slice::<SingleEvent>(&content)
            .map_err(|error| unrecognized(path, error.to_string().as_str()))?;
        if !event.is_valid() {
            return Err(unrecognized(path, "event failed validation"));
        }

        Ok(ContentClass::SingleEvent(event))
    }
}

fn is_archive(path: &Path) -> AppResult<bool> {
    let mut file = File::open(path)
        .with_context(|| format!("open payload: {}", path.display()))
        .with_code("classify_read_failed", "Failed to read received content")
        .with_ctx("path", sanitize_path(path))?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return Ok(false);
    }
    if magic != ZIP_LOCAL_HEADER && magic != ZIP_EMPTY_ARCHIVE {
        return Ok(false);
    }

    // the header alone is not enough; the central directory must parse too
    let file = File::open(path)
        .with_context(|| format!("reopen payload: {}", path.display()))
        .with_code("classify_read_failed", "Failed to read received content")
        .with_ctx("path", sanitize_path(path))?;
    Ok(zip::ZipArchive::new(file).is_ok())
}

#[cfg(test)]
#[path = "../tests/reception/classifier_tests.rs"]
mod tests;
