use std::path::{Path, PathBuf};

use pkgrecv_logging::{sanitize_for_log, sanitize_path};

use crate::collaborators::PostReceiveContext;
use crate::context::ReceptionContext;
use crate::files::{move_file, remove_dir_quietly, remove_quietly};
use crate::models::{
    CatalogEntry, CorrelationId, FocusTarget, ImportInstructions, Manifest, TransferLogDirection,
    TransferLogEntry, TransferRequest,
};
use crate::naming::{sanitize_file_stem, unique_package_path};
use crate::{AppError, AppResult, FailureKind};

/// One row of the import policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRow {
    pub extract: bool,
    pub register: bool,
    pub delete_archive: bool,
    pub persist_catalog: bool,
}

impl PolicyRow {
    const fn new(
        extract: bool,
        register: bool,
        delete_archive: bool,
        persist_catalog: bool,
    ) -> Self {
        Self {
            extract,
            register,
            delete_archive,
            persist_catalog,
        }
    }

    pub const fn of(instructions: ImportInstructions) -> Self {
        match instructions {
            ImportInstructions::ImportDelete => Self::new(true, true, true, false),
            ImportInstructions::ImportNoDelete => Self::new(true, true, false, true),
            ImportInstructions::NoImportDelete => Self::new(true, false, true, false),
            ImportInstructions::NoImportNoDelete => Self::new(true, false, false, false),
        }
    }
}

/// A verified archive handed to the policy engine.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub correlation_id: CorrelationId,
    pub archive_path: &'a Path,
    pub request: &'a TransferRequest,
    /// Manifest read from the archive before extraction.
    pub manifest: &'a Manifest,
    pub content_hash: &'a str,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    pub manifest: Manifest,
    pub row: PolicyRow,
    /// Where the archive was kept, for policies that keep it.
    pub saved_path: Option<PathBuf>,
    pub registered_entries: usize,
    pub map_item_failures: usize,
    pub focus: Option<FocusTarget>,
}

pub struct ImportPolicyEngine<'a> {
    context: &'a ReceptionContext,
}

fn extraction_failed(error: AppError) -> AppError {
    if error.kind() == FailureKind::Extraction {
        return error;
    }
    let source_code = error.code.clone();
    error
        .with_code("extract_failed", "Failed to extract package")
        .with_context("sourceCode", source_code)
}

fn focus_for(manifest: &Manifest, row: PolicyRow) -> Option<FocusTarget> {
    if !row.delete_archive {
        return Some(FocusTarget::Package(manifest.uid.clone()));
    }
    if manifest.map_item_count() == 1 && manifest.file_count() >= 1 {
        return manifest
            .map_items()
            .next()
            .and_then(|entry| entry.uid())
            .map(|uid| FocusTarget::MapItem(uid.to_string()));
    }
    None
}

impl<'a> ImportPolicyEngine<'a> {
    pub fn new(context: &'a ReceptionContext) -> Self {
        Self { context }
    }

    /// Runs extraction, keep-or-delete, catalog persistence, registration
    /// and post-receive dispatch for one archive, in that order.
    ///
    /// Returns `registration_failed` when any file entry is missing after
    /// extraction or is rejected by the registrar; by then every entry has
    /// been attempted and the keep/delete step has already run.
    pub fn apply(&self, input: PolicyInput<'_>) -> AppResult<PolicyOutcome> {
        let instructions = input.manifest.import_instructions;
        let row = PolicyRow::of(instructions);
        let working_root = self.working_root(input.manifest, input.correlation_id);

        let mut manifest = self.extract(input.archive_path, &working_root, row)?;
        let saved_path = self.keep_or_delete(&input, &mut manifest, &working_root, row)?;

        let mut failures = 0usize;
        let mut registered_entries = 0usize;
        let mut map_item_failures = 0usize;
        for entry in manifest.entries.iter().filter(|entry| !entry.is_ignore()) {
            if !entry.is_file() {
                if row.register
                    && let Err(error) = self.context.registrar.register_map_item(entry)
                {
                    map_item_failures += 1;
                    tracing::warn!(
                        event = "registration_map_item_failed",
                        correlation_id = %input.correlation_id,
                        uid = entry.uid().unwrap_or_default(),
                        error_code = error.code.as_str(),
                    );
                }
                continue;
            }

            let local = entry
                .local_path()
                .map(Path::new)
                .filter(|path| path.starts_with(&working_root) && path.is_file());
            let Some(local) = local else {
                failures += 1;
                tracing::warn!(
                    event = "manifest_entry_missing",
                    correlation_id = %input.correlation_id,
                    entry = %sanitize_for_log(entry.local_path().unwrap_or_default()),
                );
                continue;
            };
            if !row.register {
                continue;
            }

            match self
                .context
                .registrar
                .register_file_entry(local, &entry.parameters)
            {
                Ok(()) => registered_entries += 1,
                Err(error) => {
                    failures += 1;
                    tracing::warn!(
                        event = "registration_entry_failed",
                        correlation_id = %input.correlation_id,
                        path = %sanitize_path(local),
                        error_code = error.code.as_str(),
                        error_detail = %error,
                    );
                }
            }
        }

        if failures > 0 {
            let file_count = manifest.files().filter(|entry| !entry.is_ignore()).count();
            return Err(AppError::new(
                "registration_failed",
                format!("{failures} of {file_count} package files could not be imported"),
            )
            .with_context("failedEntries", failures.to_string())
            .with_context("fileEntries", file_count.to_string()));
        }

        if let Some(action) = manifest.post_receive_action() {
            let dispatch = self.context.dispatcher.dispatch(
                action,
                PostReceiveContext {
                    correlation_id: input.correlation_id,
                    sender_name: input.request.sender.display(),
                    manifest: &manifest,
                },
            );
            if let Err(error) = dispatch {
                tracing::warn!(
                    event = "post_receive_dispatch_failed",
                    correlation_id = %input.correlation_id,
                    action = %sanitize_for_log(action),
                    error_code = error.code.as_str(),
                );
            }
        }

        self.context.record_transfer(TransferLogEntry {
            direction: TransferLogDirection::Received,
            label: input.request.transfer_name.clone(),
            description: format!(
                "{} from {}",
                instructions,
                input.request.sender.display()
            ),
            size_bytes: input.size_bytes,
            at_ms: self.context.now_millis(),
        });

        tracing::info!(
            event = "policy_applied",
            correlation_id = %input.correlation_id,
            policy = instructions.as_str(),
            registered_entries,
            saved = saved_path.is_some(),
        );
        let focus = focus_for(&manifest, row);
        Ok(PolicyOutcome {
            manifest,
            row,
            saved_path,
            registered_entries,
            map_item_failures,
            focus,
        })
    }

    fn working_root(&self, manifest: &Manifest, correlation_id: CorrelationId) -> PathBuf {
        let extract_root = &self.context.settings.extract_root;
        let stem = sanitize_file_stem(manifest.uid.as_str());
        let root = extract_root.join(&stem);
        if root.exists() {
            // an earlier copy of this package may still be in use
            return extract_root.join(format!("{stem}-{}", correlation_id.0));
        }
        root
    }

    fn extract(&self, archive: &Path, working_root: &Path, row: PolicyRow) -> AppResult<Manifest> {
        let extracted = if row.extract {
            self.context.decoder.extract_manifest(archive, working_root)
        } else {
            self.context.decoder.manifest_only(archive)
        };

        extracted.map_err(|error| {
            remove_dir_quietly(working_root, "extract_cleanup_failed");
            tracing::warn!(
                event = "extract_failed",
                archive = %sanitize_path(archive),
                error_code = error.code.as_str(),
                error_detail = %error,
            );
            extraction_failed(error)
        })
    }

    fn keep_or_delete(
        &self,
        input: &PolicyInput<'_>,
        manifest: &mut Manifest,
        working_root: &Path,
        row: PolicyRow,
    ) -> AppResult<Option<PathBuf>> {
        if row.delete_archive {
            remove_quietly(input.archive_path, "policy_archive_delete_failed");
            manifest.path = None;
            return Ok(None);
        }

        let settings = &self.context.settings;
        let target = unique_package_path(
            &settings.package_dir,
            input.request.transfer_name.as_str(),
            settings.max_rename_attempts,
        );
        if let Err(error) = move_file(input.archive_path, &target) {
            remove_dir_quietly(working_root, "extract_cleanup_failed");
            return Err(AppError::new("policy_archive_move_failed", "Failed to save package")
                .with_source(error)
                .with_context("target", sanitize_path(&target)));
        }
        manifest.path = Some(target.to_string_lossy().to_string());

        if row.persist_catalog {
            let entry = CatalogEntry {
                user_label: input.request.transfer_name.clone(),
                content_hash: input.content_hash.to_string(),
                file_path: target.to_string_lossy().to_string(),
                sender_name: input.request.sender.display().to_string(),
                size_bytes: input.size_bytes,
                updated_at_ms: self.context.now_millis(),
            };
            if let Err(error) = self.context.catalog.upsert(entry) {
                remove_quietly(&target, "policy_rollback_failed");
                remove_dir_quietly(working_root, "extract_cleanup_failed");
                let source_code = error.code.clone();
                return Err(error
                    .with_code("policy_catalog_write_failed", "Failed to record saved package")
                    .with_context("sourceCode", source_code));
            }
        }

        tracing::info!(
            event = "package_saved",
            correlation_id = %input.correlation_id,
            path = %sanitize_path(&target),
            cataloged = row.persist_catalog,
        );
        Ok(Some(target))
    }
}

#[cfg(test)]
#[path = "../tests/reception/policy_tests.rs"]
mod tests;
