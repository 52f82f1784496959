use std::path::Path;
use std::time::SystemTime;

use super::*;
use crate::catalog::Catalog;
use crate::models::{CatalogEntry, ImportInstructions, SenderIdentity};
use crate::test_support::{Harness, package_manifest, sha256_hex};

fn request_for(label: &str, staged: &Path) -> TransferRequest {
    let size = std::fs::metadata(staged).expect("staged metadata").len();
    TransferRequest::new(
        label,
        sha256_hex(staged),
        size,
        SenderIdentity::new("ANDROID-7", Some("BRAVO".to_string())),
    )
}

fn service(harness: &Harness) -> ReceptionService {
    ReceptionService::from_shared(harness.context.clone())
}

fn stage(harness: &Harness) -> PathBuf {
    let manifest = package_manifest(
        "pkg-9",
        "Grid-9",
        ImportInstructions::ImportDelete,
        &["a.txt"],
    );
    harness.stage_package("grid.zip", &manifest, &[("a.txt", "alpha")])
}

fn make_stale(path: &Path) {
    let file = std::fs::File::options()
        .write(true)
        .open(path)
        .expect("open fixture");
    let past = SystemTime::now() - Duration::from_secs(48 * 3600);
    file.set_modified(past).expect("set mtime");
}

#[test]
fn handles_should_route_callbacks_until_completion() {
    let harness = Harness::new("service-route");
    let service = service(&harness);
    let staged = stage(&harness);

    let begun = service.begin_reception(request_for("Grid-9", &staged)).expect("begin");
    assert!(!begun.already_received);
    assert_eq!(service.active_sessions(), 1);

    service.on_progress(begun.handle, 10, 100, 1, 1).expect("progress");
    std::fs::copy(&staged, &begun.destination).expect("deliver payload");
    let report = service.on_complete(begun.handle, true, "", 1).expect("complete");

    assert!(report.succeeded, "{}", report.message);
    assert_eq!(report.correlation_id, begun.correlation_id);
    assert_eq!(harness.registrar.file_count(), 1);
    assert_eq!(service.active_sessions(), 0);
    assert!(!begun.destination.exists());

    let error = service
        .on_complete(begun.handle, true, "", 1)
        .expect_err("second completion");
    assert_eq!(error.code, "session_already_finalized");
    assert_eq!(harness.notifier.terminals().len(), 1);
}

#[test]
fn unknown_handle_should_be_rejected() {
    let harness = Harness::new("service-unknown");
    let service = service(&harness);

    let error = service
        .on_progress(SessionHandle(42), 1, 2, 1, 1)
        .expect_err("unknown handle");
    assert_eq!(error.code, "session_not_found");
    assert_eq!(error.context_value("handle"), Some("42"));
}

#[test]
fn duplicate_should_be_flagged_at_begin() {
    let harness = Harness::new("service-duplicate");
    let service = service(&harness);
    let staged = stage(&harness);
    let request = request_for("Grid-9", &staged);
    harness
        .catalog
        .upsert(CatalogEntry {
            user_label: "Grid-9".to_string(),
            content_hash: request.expected_hash.clone(),
            file_path: staged.to_string_lossy().to_string(),
            sender_name: "BRAVO".to_string(),
            size_bytes: 12,
            updated_at_ms: 0,
        })
        .expect("seed catalog");

    let begun = service.begin_reception(request).expect("begin");
    assert!(begun.already_received);

    let report = service.on_complete(begun.handle, true, "", 1).expect("complete");
    assert!(report.duplicate);
    assert!(report.succeeded);
    assert_eq!(harness.decoder.calls(), 0);
    assert_eq!(service.active_sessions(), 0);
}

#[test]
fn final_attempt_failure_should_retire_session() {
    let harness = Harness::new("service-attempts");
    let service = service(&harness);
    let staged = stage(&harness);

    let begun = service
        .begin_attempt(request_for("Grid-9", &staged), 1, 2)
        .expect("begin");
    assert!(
        service
            .on_attempt_failed(begun.handle, "reset by peer", 1, 2)
            .expect("attempt 1")
            .is_none()
    );
    assert_eq!(service.active_sessions(), 1);

    let report = service
        .on_attempt_failed(begun.handle, "reset by peer", 2, 2)
        .expect("attempt 2")
        .expect("final report");
    assert!(!report.succeeded);
    assert_eq!(report.failure_kind(), Some(crate::FailureKind::Transport));
    assert_eq!(service.active_sessions(), 0);

    let error = service
        .on_complete(begun.handle, false, "late", 2)
        .expect_err("retired handle");
    assert_eq!(error.code, "session_already_finalized");
}

#[test]
fn release_should_cancel_live_session_with_one_failed_notice() {
    let harness = Harness::new("service-release");
    let service = service(&harness);
    let staged = stage(&harness);

    let begun = service.begin_reception(request_for("Grid-9", &staged)).expect("begin");
    std::fs::write(&begun.destination, b"partial").expect("write partial");

    let report = service.release(begun.handle).expect("cancel report");
    assert!(!report.succeeded);
    assert_eq!(report.failure_kind(), Some(crate::FailureKind::Transport));
    assert!(service.release(begun.handle).is_none());
    assert!(!begun.destination.exists());
    assert_eq!(service.active_sessions(), 0);

    let terminals = harness.notifier.terminals();
    assert_eq!(terminals.len(), 1);
    assert!(!terminals[0].succeeded);
    assert_eq!(terminals[0].correlation_id, begun.correlation_id);
}

#[test]
fn unacknowledged_duplicate_should_be_retired_by_sweep() {
    let harness = Harness::new("service-duplicate-sweep");
    let service = service(&harness);
    let staged = stage(&harness);
    let request = request_for("Grid-9", &staged);
    harness
        .catalog
        .upsert(CatalogEntry {
            user_label: "Grid-9".to_string(),
            content_hash: request.expected_hash.clone(),
            file_path: staged.to_string_lossy().to_string(),
            sender_name: "BRAVO".to_string(),
            size_bytes: 12,
            updated_at_ms: 0,
        })
        .expect("seed catalog");

    let begun = service.begin_reception(request).expect("begin");
    assert!(begun.already_received);
    std::fs::write(&begun.destination, b"fetched anyway").expect("write payload");

    service.sweep_orphans().expect("early sweep");
    assert_eq!(service.active_sessions(), 1);

    harness.clock.advance(25 * 3600 * 1000);
    service.sweep_orphans().expect("late sweep");
    assert_eq!(service.active_sessions(), 0);
    assert!(!begun.destination.exists());
    assert_eq!(harness.notifier.terminals().len(), 1);

    let error = service
        .on_complete(begun.handle, true, "", 1)
        .expect_err("retired handle");
    assert_eq!(error.code, "session_already_finalized");
}

#[test]
fn sweep_should_spare_live_downloads() {
    let harness = Harness::new("service-sweep");
    let service = service(&harness);
    let staged = stage(&harness);
    let incoming = harness.context.settings().incoming_dir.clone();

    let begun = service.begin_reception(request_for("Grid-9", &staged)).expect("begin");
    std::fs::write(&begun.destination, b"partial").expect("write live");
    make_stale(&begun.destination);

    let orphan = incoming.join("left-over.part");
    std::fs::write(&orphan, b"orphan").expect("write orphan");
    make_stale(&orphan);

    assert_eq!(service.sweep_orphans().expect("sweep"), 1);
    assert!(!orphan.exists());
    assert!(begun.destination.exists());
}

#[tokio::test]
async fn complete_async_should_run_pipeline_off_thread() {
    let harness = Harness::new("service-async");
    let service = Arc::new(service(&harness));
    let staged = stage(&harness);

    let begun = service.begin_reception(request_for("Grid-9", &staged)).expect("begin");
    std::fs::copy(&staged, &begun.destination).expect("deliver payload");

    let report = service
        .complete_async(begun.handle, true, String::new(), 1)
        .await
        .expect("complete");
    assert!(report.succeeded, "{}", report.message);
    assert_eq!(service.active_sessions(), 0);
}
