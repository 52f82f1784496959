use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::Context;
use pkgrecv_logging::{sanitize_for_log, sanitize_path};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::models::{Manifest, PARAM_LOCAL_PATH, PARAM_ZIP_ENTRY};
use crate::{AppError, AppResult, ResultExt};

pub const MANIFEST_ENTRY: &str = "MANIFEST/manifest.json";
const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

/// Reads packages. Low-level container decoding lives behind this seam.
pub trait ArchiveDecoder: Send + Sync {
    /// Reads the manifest without extracting anything.
    fn manifest_only(&self, archive: &Path) -> AppResult<Manifest>;

    /// Extracts every non-ignored file entry under `working_root` and
    /// returns the manifest with `localPath` set on each extracted entry.
    fn extract_manifest(&self, archive: &Path, working_root: &Path) -> AppResult<Manifest>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiveDecoder;

fn open_archive(path: &Path) -> AppResult<ZipArchive<BufReader<File>>> {
    let file = File::open(path)
        .with_context(|| format!("open package: {}", path.display()))
        .with_code("archive_open_failed", "Failed to open package")
        .with_ctx("path", sanitize_path(path))?;
    ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("read package directory: {}", path.display()))
        .with_code("archive_open_failed", "Package is not a readable archive")
        .with_ctx("path", sanitize_path(path))
}

fn read_manifest(archive: &mut ZipArchive<BufReader<File>>, path: &Path) -> AppResult<Manifest> {
    let entry = match archive.by_name(MANIFEST_ENTRY) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(
                AppError::new("archive_manifest_missing", "Package has no manifest")
                    .with_context("path", sanitize_path(path)),
            );
        }
        Err(error) => {
            return Err(AppError::new(
                "archive_manifest_read_failed",
                "Failed to read package manifest",
            )
            .with_source(error)
            .with_context("path", sanitize_path(path)));
        }
    };

    let mut content = Vec::new();
    entry
        .take(MAX_MANIFEST_BYTES)
        .read_to_end(&mut content)
        .with_context(|| format!("read manifest: {}", path.display()))
        .with_code("archive_manifest_read_failed", "Failed to read package manifest")
        .with_ctx("path", sanitize_path(path))?;

    let mut manifest = serde_json::from_slice::<Manifest>(&content)
        .with_context(|| format!("parse manifest: {}", path.display()))
        .with_code("archive_manifest_parse_failed", "Package manifest is malformed")
        .with_ctx("path", sanitize_path(path))?;

    // local paths are assigned by extraction only, never by the sender
    for entry in manifest.entries.iter_mut() {
        if entry.remove_parameter(PARAM_LOCAL_PATH).is_some() {
            tracing::warn!(
                event = "manifest_local_path_discarded",
                archive = %sanitize_path(path),
            );
        }
    }
    Ok(manifest)
}

impl ArchiveDecoder for ZipArchiveDecoder {
    fn manifest_only(&self, archive: &Path) -> AppResult<Manifest> {
        let mut zip = open_archive(archive)?;
        read_manifest(&mut zip, archive)
    }

    fn extract_manifest(&self, archive: &Path, working_root: &Path) -> AppResult<Manifest> {
        let mut zip = open_archive(archive)?;
        let mut manifest = read_manifest(&mut zip, archive)?;
        std::fs::create_dir_all(working_root)
            .with_context(|| format!("create working root: {}", working_root.display()))
            .with_code("extract_dir_create_failed", "Failed to prepare extraction directory")
            .with_ctx("path", sanitize_path(working_root))?;

        for entry in manifest.entries.iter_mut() {
            if !entry.is_file() || entry.is_ignore() {
                continue;
            }
            let Some(zip_entry) = entry.parameter(PARAM_ZIP_ENTRY).map(str::to_string) else {
                continue;
            };

            let mut file = match zip.by_name(zip_entry.as_str()) {
                Ok(file) => file,
                Err(ZipError::FileNotFound) => {
                    // left without a local path; the existence check flags it
                    tracing::warn!(
                        event = "archive_entry_missing",
                        zip_entry = %sanitize_for_log(zip_entry.as_str()),
                    );
                    continue;
                }
                Err(error) => {
                    return Err(AppError::new(
                        "extract_entry_failed",
                        "Failed to extract package entry",
                    )
                    .with_source(error)
                    .with_context("zipEntry", sanitize_for_log(zip_entry.as_str())));
                }
            };

            let relative = file.enclosed_name().ok_or_else(|| {
                AppError::new(
                    "archive_path_traversal",
                    "Package entry points outside the extraction directory",
                )
                .with_context("zipEntry", sanitize_for_log(zip_entry.as_str()))
            })?;
            if file.is_dir() {
                continue;
            }

            let target = working_root.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create entry directory: {}", parent.display()))
                    .with_code(
                        "extract_dir_create_failed",
                        "Failed to prepare extraction directory",
                    )
                    .with_ctx("path", sanitize_path(parent))?;
            }
            let mut output = File::create(&target)
                .with_context(|| format!("create extracted file: {}", target.display()))
                .with_code("extract_write_failed", "Failed to write extracted file")
                .with_ctx("path", sanitize_path(&target))?;
            std::io::copy(&mut file, &mut output)
                .with_context(|| format!("write extracted file: {}", target.display()))
                .with_code("extract_write_failed", "Failed to write extracted file")
                .with_ctx("path", sanitize_path(&target))?;

            entry.set_parameter(PARAM_LOCAL_PATH, target.to_string_lossy().to_string());
        }

        tracing::debug!(
            event = "archive_extracted",
            archive = %sanitize_path(archive),
            working_root = %sanitize_path(working_root),
            file_count = manifest.file_count(),
        );
        Ok(manifest)
    }
}

#[cfg(test)]
#[path = "../tests/reception/archive_tests.rs"]
mod tests;
