use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use pkgrecv_logging::sanitize_path;
use regex::Regex;

pub const PACKAGE_EXTENSION: &str = "zip";
const FALLBACK_STEM: &str = "package";
const ELLIPSIS: &str = "...";

static UNSAFE_STEM_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^\w.\- ]+").ok());

/// Turns a sender-chosen label into a file stem that is safe on every
/// platform we save to. A trailing `.zip` is dropped so it is not doubled.
pub fn sanitize_file_stem(label: &str) -> String {
    let trimmed = label.trim();
    let without_extension = trimmed
        .len()
        .checked_sub(PACKAGE_EXTENSION.len() + 1)
        .filter(|split| {
            trimmed.is_char_boundary(*split)
                && trimmed[*split..].eq_ignore_ascii_case(".zip")
        })
        .map_or(trimmed, |split| &trimmed[..split]);

    let replaced = match UNSAFE_STEM_CHARS.as_ref() {
        Some(regex) => regex.replace_all(without_extension, "_").into_owned(),
        None => without_extension
            .chars()
            .map(|ch| {
                if ch.is_alphanumeric() || matches!(ch, '_' | '.' | '-' | ' ') {
                    ch
                } else {
                    '_'
                }
            })
            .collect(),
    };

    let stem = replaced.trim().trim_start_matches('.').trim();
    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem.to_string()
    }
}

/// Picks `<dir>/<label>.zip`, then `<label>-1.zip`, `<label>-2.zip` ... up to
/// `max_attempts` suffixes. When every candidate is taken the plain name is
/// returned and the caller overwrites it.
pub fn unique_package_path(dir: &Path, label: &str, max_attempts: u32) -> PathBuf {
    let stem = sanitize_file_stem(label);
    let base = dir.join(format!("{stem}.{PACKAGE_EXTENSION}"));
    if !base.exists() {
        return base;
    }

    for index in 1..=max_attempts {
        let candidate = dir.join(format!("{stem}-{index}.{PACKAGE_EXTENSION}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    tracing::warn!(
        event = "package_name_exhausted",
        path = %sanitize_path(&base),
        max_attempts,
    );
    base
}

/// Shortens `name` to at most `max_len` characters, keeping its head and
/// tail around an ellipsis.
pub fn abbreviate_name(name: &str, max_len: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= max_len || max_len <= ELLIPSIS.len() {
        return name.to_string();
    }

    let keep = max_len - ELLIPSIS.len();
    let tail_len = keep / 2;
    let head_len = keep - tail_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    format!("{head}{ELLIPSIS}{tail}")
}

#[cfg(test)]
#[path = "../tests/reception/naming_tests.rs"]
mod tests;
