use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use pkgrecv_kernel::sync::{lock_mutex, read_lock, write_lock};
use pkgrecv_logging::sanitize_path;
use serde::{Deserialize, Serialize};

use crate::files::write_atomic;
use crate::integrity::hashes_match;
use crate::models::{CatalogEntry, TransferLogEntry};
use crate::{AppError, AppResult};

const TRANSFER_LOG_LIMIT: usize = 1_000;

/// Persistent record of saved packages and received transfers.
///
/// Each call is atomic on its own; callers never hold a catalog lock across
/// other pipeline work.
pub trait Catalog: Send + Sync {
    fn find_by_label_and_hash(&self, label: &str, hash: &str) -> AppResult<Option<CatalogEntry>>;
    /// Inserts `entry` or replaces the entry saved at the same file path.
    fn upsert(&self, entry: CatalogEntry) -> AppResult<()>;
    fn insert_transfer_log(&self, entry: TransferLogEntry) -> AppResult<()>;
}

fn matches_label_and_hash(entry: &CatalogEntry, label: &str, hash: &str) -> bool {
    entry.user_label == label && hashes_match(entry.content_hash.as_str(), hash)
}

fn upsert_into(entries: &mut Vec<CatalogEntry>, entry: CatalogEntry) {
    match entries
        .iter_mut()
        .find(|existing| existing.file_path == entry.file_path)
    {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

fn push_transfer_log(log: &mut Vec<TransferLogEntry>, entry: TransferLogEntry) {
    log.push(entry);
    if log.len() > TRANSFER_LOG_LIMIT {
        let overflow = log.len() - TRANSFER_LOG_LIMIT;
        log.drain(..overflow);
    }
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<Vec<CatalogEntry>>,
    transfer_log: Mutex<Vec<TransferLogEntry>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        read_lock(&self.entries, "catalog_entries").clone()
    }

    pub fn transfer_log(&self) -> Vec<TransferLogEntry> {
        lock_mutex(&self.transfer_log, "catalog_transfer_log").clone()
    }
}

impl Catalog for MemoryCatalog {
    fn find_by_label_and_hash(&self, label: &str, hash: &str) -> AppResult<Option<CatalogEntry>> {
        Ok(read_lock(&self.entries, "catalog_entries")
            .iter()
            .find(|entry| matches_label_and_hash(entry, label, hash))
            .cloned())
    }

    fn upsert(&self, entry: CatalogEntry) -> AppResult<()> {
        upsert_into(&mut write_lock(&self.entries, "catalog_entries"), entry);
        Ok(())
    }

    fn insert_transfer_log(&self, entry: TransferLogEntry) -> AppResult<()> {
        push_transfer_log(
            &mut lock_mutex(&self.transfer_log, "catalog_transfer_log"),
            entry,
        );
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CatalogDocument {
    entries: Vec<CatalogEntry>,
    transfer_log: Vec<TransferLogEntry>,
}

/// Catalog kept in a single JSON document, rewritten atomically on change.
#[derive(Debug)]
pub struct JsonFileCatalog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn entries(&self) -> AppResult<Vec<CatalogEntry>> {
        let _guard = lock_mutex(&self.guard, "json_catalog");
        Ok(self.read_document()?.entries)
    }

    pub fn transfer_log(&self) -> AppResult<Vec<TransferLogEntry>> {
        let _guard = lock_mutex(&self.guard, "json_catalog");
        Ok(self.read_document()?.transfer_log)
    }

    fn read_document(&self) -> AppResult<CatalogDocument> {
        let content = match fs::read(&self.path) {
            Ok(value) => value,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(CatalogDocument::default());
            }
            Err(error) => {
                return Err(AppError::new("catalog_read_failed", "Failed to read package catalog")
                    .with_source(error)
                    .with_context("path", sanitize_path(&self.path)));
            }
        };

        serde_json::from_slice(&content).map_err(|error| {
            AppError::new("catalog_parse_failed", "Package catalog is malformed")
                .with_source(error)
                .with_context("path", sanitize_path(&self.path))
        })
    }

    fn write_document(&self, document: &CatalogDocument) -> AppResult<()> {
        let serialized = serde_json::to_vec_pretty(document).map_err(|error| {
            AppError::new("catalog_serialize_failed", "Failed to serialize package catalog")
                .with_source(error)
        })?;
        write_atomic(&self.path, &serialized, "catalog_write_failed")
    }

    fn modify(&self, change: impl FnOnce(&mut CatalogDocument)) -> AppResult<()> {
        let _guard = lock_mutex(&self.guard, "json_catalog");
        let mut document = self.read_document()?;
        change(&mut document);
        self.write_document(&document)
    }
}

impl Catalog for JsonFileCatalog {
    fn find_by_label_and_hash(&self, label: &str, hash: &str) -> AppResult<Option<CatalogEntry>> {
        let _guard = lock_mutex(&self.guard, "json_catalog");
        Ok(self
            .read_document()?
            .entries
            .into_iter()
            .find(|entry| matches_label_and_hash(entry, label, hash)))
    }

    fn upsert(&self, entry: CatalogEntry) -> AppResult<()> {
        self.modify(|document| upsert_into(&mut document.entries, entry))
    }

    fn insert_transfer_log(&self, entry: TransferLogEntry) -> AppResult<()> {
        self.modify(|document| push_transfer_log(&mut document.transfer_log, entry))
    }
}

#[cfg(test)]
#[path = "../tests/reception/catalog_tests.rs"]
mod tests;
