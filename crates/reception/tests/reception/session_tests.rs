use std::sync::Arc;

use super::*;
use crate::catalog::Catalog;
use crate::interceptor::TransferInterceptor;
use crate::models::{CatalogEntry, ImportInstructions, Manifest, SenderIdentity};
use crate::test_support::{Harness, package_manifest, sha256_hex};

const THREE_FILES: [(&str, &str); 3] = [
    ("a.txt", "alpha"),
    ("b.txt", "bravo"),
    ("c.txt", "charlie"),
];

fn request_for(label: &str, staged: &Path) -> TransferRequest {
    let size = std::fs::metadata(staged).expect("staged metadata").len();
    TransferRequest::new(
        label,
        sha256_hex(staged),
        size,
        SenderIdentity::new("ANDROID-1", Some("ALPHA".to_string())),
    )
}

fn deliver(session: &TransferSession, staged: &Path) {
    std::fs::copy(staged, session.destination()).expect("deliver payload");
}

fn begin(harness: &Harness, request: TransferRequest) -> TransferSession {
    TransferSession::begin(harness.context.clone(), request, 1, 1).expect("begin")
}

struct ClaimAll;

impl TransferInterceptor for ClaimAll {
    fn name(&self) -> &str {
        "claim-all"
    }

    fn on_package_received(&self, _meta: &TransferMeta, _manifest: &Manifest) -> bool {
        true
    }
}

struct CopyOut {
    target: PathBuf,
}

impl TransferInterceptor for CopyOut {
    fn name(&self) -> &str {
        "copy-out"
    }

    fn on_package_received(&self, meta: &TransferMeta, _manifest: &Manifest) -> bool {
        std::fs::copy(&meta.archive_path, &self.target).is_ok()
    }
}

#[test]
fn recon_package_with_import_delete_should_register_all_files() {
    let harness = Harness::new("session-recon");
    let manifest = package_manifest(
        "recon-1",
        "Recon-1",
        ImportInstructions::ImportDelete,
        &["a.txt", "b.txt", "c.txt"],
    );
    let staged = harness.stage_package("recon.zip", &manifest, &THREE_FILES);

    let mut session = begin(&harness, request_for("Recon-1", &staged));
    deliver(&session, &staged);
    let report = session.on_complete(true, "", 1).expect("complete");

    assert!(report.succeeded, "{}", report.message);
    assert_eq!(harness.registrar.file_count(), 3);
    assert!(!session.destination().exists());
    assert!(harness.catalog.entries().is_empty());
    assert_eq!(session.state(), SessionState::Done(Outcome::Success));

    let terminals = harness.notifier.terminals();
    assert_eq!(terminals.len(), 1);
    assert!(terminals[0].succeeded);
    assert_eq!(terminals[0].correlation_id, session.correlation_id());
}

#[test]
fn hash_mismatch_should_fail_and_remove_temp_file() {
    let harness = Harness::new("session-hash");
    let manifest = package_manifest(
        "pkg-1",
        "Recon-1",
        ImportInstructions::ImportDelete,
        &["a.txt"],
    );
    let staged = harness.stage_package("pkg.zip", &manifest, &[("a.txt", "alpha")]);
    let mut request = request_for("Recon-1", &staged);
    request.expected_hash = "abc123".to_string();

    let mut session = begin(&harness, request);
    deliver(&session, &staged);
    let report = session.on_complete(true, "", 1).expect("complete");

    assert!(!report.succeeded);
    assert_eq!(report.failure_kind(), Some(FailureKind::Integrity));
    assert_eq!(
        report.failure.as_ref().map(|error| error.code.as_str()),
        Some("integrity_hash_mismatch")
    );
    assert!(!session.destination().exists());
    assert_eq!(harness.decoder.calls(), 0);
    assert_eq!(harness.notifier.terminals().len(), 1);
    assert_eq!(session.state(), SessionState::Done(Outcome::Failure));
}

#[test]
fn duplicate_should_succeed_without_decoding() {
    let harness = Harness::new("session-duplicate");
    let manifest = package_manifest(
        "pkg-1",
        "Recon-1",
        ImportInstructions::ImportNoDelete,
        &["a.txt"],
    );
    let staged = harness.stage_package("pkg.zip", &manifest, &[("a.txt", "alpha")]);
    let request = request_for("Recon-1", &staged);
    harness
        .catalog
        .upsert(CatalogEntry {
            user_label: "Recon-1".to_string(),
            content_hash: request.expected_hash.to_ascii_uppercase(),
            file_path: staged.to_string_lossy().to_string(),
            sender_name: "ALPHA".to_string(),
            size_bytes: 77,
            updated_at_ms: 0,
        })
        .expect("seed catalog");

    let mut session = begin(&harness, request);
    assert!(session.is_duplicate());
    let report = session.on_complete(true, "", 1).expect("complete");

    assert!(report.succeeded);
    assert!(report.duplicate);
    assert_eq!(harness.decoder.calls(), 0);
    assert_eq!(harness.notifier.terminals().len(), 1);
    assert!(harness.notifier.progress().is_empty());
    let log = harness.catalog.transfer_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].size_bytes, 77);

    let error = session.on_complete(true, "", 1).expect_err("second completion");
    assert_eq!(error.code, "session_already_finalized");
    assert_eq!(harness.notifier.terminals().len(), 1);
}

#[test]
fn stale_catalog_entry_should_not_short_circuit() {
    let harness = Harness::new("session-stale");
    let manifest = package_manifest(
        "pkg-1",
        "Recon-1",
        ImportInstructions::ImportDelete,
        &["a.txt"],
    );
    let staged = harness.stage_package("pkg.zip", &manifest, &[("a.txt", "alpha")]);
    let request = request_for("Recon-1", &staged);
    harness
        .catalog
        .upsert(CatalogEntry {
            user_label: "Recon-1".to_string(),
            content_hash: request.expected_hash.clone(),
            file_path: harness.root.join("vanished.zip").to_string_lossy().to_string(),
            sender_name: "ALPHA".to_string(),
            size_bytes: 1,
            updated_at_ms: 0,
        })
        .expect("seed catalog");

    let mut session = begin(&harness, request);
    assert!(!session.is_duplicate());
    assert_eq!(harness.notifier.progress().len(), 1);
    deliver(&session, &staged);
    assert!(session.on_complete(true, "", 1).expect("complete").succeeded);
    assert_eq!(harness.registrar.file_count(), 1);
}

#[test]
fn claiming_interceptor_should_skip_policy_engine() {
    let harness = Harness::new("session-intercept");
    harness.context.interceptors().register(Arc::new(ClaimAll));
    let manifest = package_manifest(
        "pkg-1",
        "Recon-1",
        ImportInstructions::ImportNoDelete,
        &["a.txt"],
    );
    let staged = harness.stage_package("pkg.zip", &manifest, &[("a.txt", "alpha")]);

    let mut session = begin(&harness, request_for("Recon-1", &staged));
    deliver(&session, &staged);
    let report = session.on_complete(true, "", 1).expect("complete");

    assert!(report.succeeded);
    assert!(report.intercepted);
    assert_eq!(harness.decoder.extraction_count(), 0);
    assert_eq!(harness.registrar.file_count(), 0);
    assert!(harness.catalog.entries().is_empty());
    assert!(!session.destination().exists());
    assert_eq!(session.state(), SessionState::Done(Outcome::Success));
}

#[test]
fn claiming_interceptor_should_keep_only_its_own_copy() {
    let harness = Harness::new("session-intercept-copy");
    let target = harness.root.join("claimed.zip");
    harness.context.interceptors().register(Arc::new(CopyOut {
        target: target.clone(),
    }));
    let manifest = package_manifest(
        "pkg-2",
        "Recon-2",
        ImportInstructions::ImportNoDelete,
        &["a.txt"],
    );
    let staged = harness.stage_package("pkg.zip", &manifest, &[("a.txt", "alpha")]);

    let mut session = begin(&harness, request_for("Recon-2", &staged));
    deliver(&session, &staged);
    let report = session.on_complete(true, "", 1).expect("complete");

    assert!(report.intercepted);
    assert!(!session.destination().exists());
    assert_eq!(sha256_hex(&target), sha256_hex(&staged));
}

#[test]
fn transport_failure_should_finish_with_one_failure_notice() {
    let harness = Harness::new("session-transport");
    let request = TransferRequest::new("Recon-1", "", 0, SenderIdentity::new("ANDROID-1", None));
    let mut session = begin(&harness, request);
    std::fs::write(session.destination(), b"partial").expect("write partial");

    let report = session.on_complete(false, "link lost", 1).expect("complete");
    assert!(!report.succeeded);
    assert_eq!(report.failure_kind(), Some(FailureKind::Transport));
    assert!(!session.destination().exists());

    let error = session.on_complete(true, "", 1).expect_err("already finalized");
    assert_eq!(error.code, "session_already_finalized");
    let terminals = harness.notifier.terminals();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].failure, Some(FailureKind::Transport));
}

#[test]
fn attempt_failures_should_notify_until_attempts_run_out() {
    let harness = Harness::new("session-attempts");
    let request = TransferRequest::new("Recon-1", "", 0, SenderIdentity::new("ANDROID-1", None));
    let mut session =
        TransferSession::begin(harness.context.clone(), request, 1, 3).expect("begin");
    std::fs::write(session.destination(), b"partial").expect("write partial");

    assert!(session.on_attempt_failed("timeout", 1, 3).expect("attempt 1").is_none());
    assert!(session.on_attempt_failed("timeout", 2, 3).expect("attempt 2").is_none());
    assert_eq!(session.state(), SessionState::Receiving);
    assert!(harness.notifier.terminals().is_empty());

    let report = session
        .on_attempt_failed("timeout", 3, 3)
        .expect("attempt 3")
        .expect("final report");
    assert!(!report.succeeded);
    assert!(!session.destination().exists());

    let attempts = harness.notifier.attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts[1].3.starts_with("Attempt 2 of 3 failed"));
    assert_eq!(harness.notifier.terminals().len(), 1);
    assert!(session.on_attempt_failed("timeout", 4, 3).is_err());
}

#[test]
fn progress_should_be_throttled_by_interval() {
    let harness = Harness::new("session-progress");
    let request = TransferRequest::new("Recon-1", "", 1000, SenderIdentity::new("ANDROID-1", None));
    let mut session = begin(&harness, request);
    assert_eq!(harness.notifier.progress().len(), 1);

    session.on_progress(0, 1000, 1, 1);
    harness.clock.advance(500);
    session.on_progress(100, 1000, 1, 1);
    assert_eq!(harness.notifier.progress().len(), 1);

    harness.clock.advance(600);
    session.on_progress(300, 1000, 1, 1);
    let progress = harness.notifier.progress();
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[1].percent, Some(30));
    assert!(progress[1].speed_bps > 0);

    harness.clock.advance(100);
    session.on_progress(400, 1000, 1, 1);
    assert_eq!(harness.notifier.progress().len(), 2);
}

#[test]
fn single_event_should_be_registered_with_event_focus() {
    let harness = Harness::new("session-event");
    let staged = harness.root.join("event.json");
    std::fs::write(&staged, r#"{"uid":"evt-9","type":"b-m-p","callsign":"BRAVO"}"#)
        .expect("write event");

    let mut session = begin(&harness, request_for("BRAVO marker", &staged));
    deliver(&session, &staged);
    let report = session.on_complete(true, "", 1).expect("complete");

    assert!(report.succeeded);
    assert_eq!(report.focus, Some(FocusTarget::Event("evt-9".to_string())));
    assert_eq!(harness.registrar.events().len(), 1);
    assert_eq!(harness.decoder.calls(), 0);
    assert!(!session.destination().exists());
}

#[test]
fn unrecognized_payload_should_fail_classification() {
    let harness = Harness::new("session-unrecognized");
    let staged = harness.root.join("blob.bin");
    std::fs::write(&staged, [0u8, 1, 2, 3, 4]).expect("write blob");

    let mut session = begin(&harness, request_for("blob", &staged));
    deliver(&session, &staged);
    let report = session.on_complete(true, "", 1).expect("complete");

    assert_eq!(report.failure_kind(), Some(FailureKind::Classification));
    assert!(!session.destination().exists());
}

#[test]
fn incomplete_manifest_should_fail_before_extraction() {
    let harness = Harness::new("session-badmanifest");
    let manifest = package_manifest("", "Recon-1", ImportInstructions::ImportDelete, &["a.txt"]);
    let staged = harness.stage_package("pkg.zip", &manifest, &[("a.txt", "alpha")]);

    let mut session = begin(&harness, request_for("Recon-1", &staged));
    deliver(&session, &staged);
    let report = session.on_complete(true, "", 1).expect("complete");

    assert_eq!(
        report.failure.as_ref().map(|error| error.code.as_str()),
        Some("archive_manifest_invalid")
    );
    assert_eq!(report.failure_kind(), Some(FailureKind::Extraction));
    assert_eq!(harness.decoder.extraction_count(), 0);
}

#[test]
fn partial_registration_failure_should_report_count() {
    let harness = Harness::with_registrar(
        "session-partial",
        crate::test_support::RecordingRegistrar::rejecting(&["c.txt"]),
    );
    let manifest = package_manifest(
        "pkg-1",
        "Recon-1",
        ImportInstructions::ImportDelete,
        &["a.txt", "b.txt", "c.txt"],
    );
    let staged = harness.stage_package("pkg.zip", &manifest, &THREE_FILES);

    let mut session = begin(&harness, request_for("Recon-1", &staged));
    deliver(&session, &staged);
    let report = session.on_complete(true, "", 1).expect("complete");

    assert!(!report.succeeded);
    assert_eq!(report.failure_kind(), Some(FailureKind::Registration));
    assert!(report.message.contains("1 of 3"));
    assert_eq!(harness.registrar.file_count(), 2);
}

#[test]
fn dropping_unfinished_session_should_remove_temp_file() {
    let harness = Harness::new("session-drop");
    let request = TransferRequest::new("Recon-1", "", 0, SenderIdentity::new("ANDROID-1", None));
    let session = begin(&harness, request);
    let destination = session.destination().to_path_buf();
    std::fs::write(&destination, b"partial").expect("write partial");

    drop(session);
    assert!(!destination.exists());
}

#[test]
fn cancel_should_finish_live_session_once() {
    let harness = Harness::new("session-cancel");
    let manifest = package_manifest(
        "pkg-1",
        "Recon-1",
        ImportInstructions::ImportDelete,
        &["a.txt"],
    );
    let staged = harness.stage_package("pkg.zip", &manifest, &[("a.txt", "alpha")]);
    let mut session = begin(&harness, request_for("Recon-1", &staged));
    std::fs::write(session.destination(), b"partial").expect("write partial");

    let report = session.cancel("user closed the feed").expect("report");
    assert!(!report.succeeded);
    assert_eq!(
        report.failure.as_ref().map(|error| error.code.as_str()),
        Some("transport_cancelled")
    );
    assert_eq!(session.state(), SessionState::Done(Outcome::Failure));
    assert!(!session.destination().exists());

    assert!(session.cancel("again").is_none());
    assert_eq!(harness.notifier.terminals().len(), 1);
    assert!(session.on_complete(true, "", 1).is_err());
}
