use std::io::Read;
use std::path::Path;

use anyhow::Context;
use pkgrecv_logging::sanitize_path;
use sha2::{Digest, Sha256};

use crate::{AppError, AppResult, IntegrityFailure, ResultExt};

const HASH_BUFFER_LEN: usize = 1024 * 1024;

/// Lowercase hex SHA-256 of the file, the digest senders announce.
pub fn file_hash_hex(path: &Path) -> AppResult<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("open file for hashing: {}", path.display()))
        .with_code("integrity_read_failed", "Failed to read received file")
        .with_ctx("path", sanitize_path(path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_LEN];
    loop {
        let read_count = file
            .read(buffer.as_mut_slice())
            .with_context(|| format!("read file for hashing: {}", path.display()))
            .with_code("integrity_read_failed", "Failed to read received file")
            .with_ctx("path", sanitize_path(path))?;
        if read_count == 0 {
            break;
        }
        hasher.update(&buffer[..read_count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn hashes_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Checks a completed download against the size and hash announced by the
/// sender. `expected_length == 0` skips the size check and an empty
/// `expected_hash` skips the hash check.
///
/// Read-only: the file is never modified or removed here.
pub fn verify_download(path: &Path, expected_length: u64, expected_hash: &str) -> AppResult<()> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(AppError::from(IntegrityFailure::MissingFile)),
    };

    if expected_length > 0 && metadata.len() != expected_length {
        return Err(IntegrityFailure::SizeMismatch {
            expected: expected_length,
            actual: metadata.len(),
        }
        .into());
    }

    if expected_hash.trim().is_empty() {
        tracing::warn!(
            event = "integrity_hash_unannounced",
            path = %sanitize_path(path),
        );
        return Ok(());
    }

    let actual = file_hash_hex(path)?;
    if !hashes_match(expected_hash, actual.as_str()) {
        return Err(IntegrityFailure::HashMismatch {
            expected: expected_hash.trim().to_ascii_lowercase(),
            actual,
        }
        .into());
    }

    tracing::debug!(
        event = "integrity_verified",
        path = %sanitize_path(path),
        size_bytes = metadata.len(),
    );
    Ok(())
}

#[cfg(test)]
#[path = "../tests/reception/integrity_tests.rs"]
mod tests;
