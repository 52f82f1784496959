use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use super::MAX_STRING_LEN;

fn short_hash(value: &str) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

fn truncate_text(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }

    let mut truncated = String::new();
    for ch in value.chars() {
        if truncated.len() + ch.len_utf8() > max_len {
            break;
        }
        truncated.push(ch);
    }

    format!("{truncated}...(truncated,len={})", value.len())
}

pub(crate) fn normalize_level(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

fn looks_like_path(value: &str) -> bool {
    if value.starts_with("file://") || value.starts_with("~/") || value.starts_with('/') {
        return true;
    }

    value.contains(":\\") || value.contains('\\') || value.matches('/').count() >= 2
}

/// Keeps the file name and replaces the directory part with a short hash.
pub fn sanitize_path(value: impl AsRef<Path>) -> String {
    let path = value.as_ref();
    let raw = path.to_string_lossy();
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("unknown");

    format!("[path:{} dir_hash={}]", file_name, short_hash(raw.trim()))
}

pub fn sanitize_for_log(value: &str) -> String {
    let normalized = value.trim();
    if normalized.is_empty() {
        return String::new();
    }

    if looks_like_path(normalized) {
        return sanitize_path(normalized);
    }

    truncate_text(normalized, MAX_STRING_LEN)
}
