use std::path::Path;
use std::sync::Arc;

use pkgrecv_logging::{sanitize_for_log, sanitize_path};

use crate::catalog::Catalog;
use crate::models::CatalogEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateLookup {
    NotFound,
    /// A catalog entry whose file is still on disk.
    Found(CatalogEntry),
    /// The catalog knows the transfer but its file is gone.
    Stale(CatalogEntry),
}

impl DuplicateLookup {
    pub fn existing_path(&self) -> Option<&str> {
        match self {
            Self::Found(entry) => Some(entry.file_path.as_str()),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Pre-check against the catalog so an already saved package is not
/// received twice. Holds no state of its own.
#[derive(Clone)]
pub struct DuplicateRegistry {
    catalog: Arc<dyn Catalog>,
}

impl DuplicateRegistry {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Looks up `(label, hash)`. An empty hash never matches. Catalog errors
    /// and catalog/disk divergence degrade to "not found" after logging.
    pub fn lookup(&self, label: &str, hash: &str) -> DuplicateLookup {
        if hash.trim().is_empty() {
            return DuplicateLookup::NotFound;
        }

        let entry = match self.catalog.find_by_label_and_hash(label, hash) {
            Ok(Some(entry)) => entry,
            Ok(None) => return DuplicateLookup::NotFound,
            Err(error) => {
                tracing::warn!(
                    event = "duplicate_lookup_failed",
                    label = %sanitize_for_log(label),
                    error_code = error.code.as_str(),
                    error_detail = %error,
                );
                return DuplicateLookup::NotFound;
            }
        };

        let path = Path::new(entry.file_path.as_str());
        if path.is_file() {
            tracing::info!(
                event = "duplicate_transfer_detected",
                label = %sanitize_for_log(label),
                path = %sanitize_path(path),
            );
            return DuplicateLookup::Found(entry);
        }

        tracing::warn!(
            event = "catalog_divergence",
            label = %sanitize_for_log(label),
            path = %sanitize_path(path),
        );
        DuplicateLookup::Stale(entry)
    }
}

#[cfg(test)]
#[path = "../tests/reception/duplicate_tests.rs"]
mod tests;
