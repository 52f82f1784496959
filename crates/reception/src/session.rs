use std::path::{Path, PathBuf};
use std::sync::Arc;

use pkgrecv_logging::{sanitize_for_log, sanitize_path};

use crate::classifier::ContentClass;
use crate::context::ReceptionContext;
use crate::duplicate::DuplicateLookup;
use crate::files::remove_quietly;
use crate::integrity::{file_hash_hex, verify_download};
use crate::interceptor::TransferMeta;
use crate::models::{
    CorrelationId, FocusTarget, ProgressUpdate, TerminalNotice, TransferLogDirection,
    TransferLogEntry, TransferRequest,
};
use crate::naming::abbreviate_name;
use crate::policy::PolicyInput;
use crate::progress::ProgressTracker;
use crate::{AppError, AppResult, FailureKind, InvokeError};

const PART_EXTENSION: &str = "part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Receiving,
    Verifying,
    Classifying,
    Intercepted,
    PolicyProcessing,
    Notifying,
    Done(Outcome),
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Receiving => "receiving",
            Self::Verifying => "verifying",
            Self::Classifying => "classifying",
            Self::Intercepted => "intercepted",
            Self::PolicyProcessing => "policy_processing",
            Self::Notifying => "notifying",
            Self::Done(Outcome::Success) => "done_success",
            Self::Done(Outcome::Failure) => "done_failure",
        }
    }

    pub fn is_done(self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Terminal result of one reception attempt.
#[derive(Debug, Clone)]
pub struct ReceptionReport {
    pub correlation_id: CorrelationId,
    pub succeeded: bool,
    pub message: String,
    pub focus: Option<FocusTarget>,
    pub failure: Option<InvokeError>,
    pub duplicate: bool,
    pub intercepted: bool,
    pub saved_path: Option<PathBuf>,
}

impl ReceptionReport {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|error| error.kind)
    }
}

struct Completed {
    message: String,
    focus: Option<FocusTarget>,
    intercepted: bool,
    saved_path: Option<PathBuf>,
}

/// One reception attempt, from the first byte to a single terminal outcome.
///
/// Not thread-safe by itself; callers serialise access (the service keeps
/// each session behind its own mutex). Dropping a session that never
/// reached `Done` removes its temp file.
pub struct TransferSession {
    context: Arc<ReceptionContext>,
    request: TransferRequest,
    correlation_id: CorrelationId,
    destination: PathBuf,
    attempt: u32,
    max_attempts: u32,
    state: SessionState,
    progress: ProgressTracker,
    ticker: String,
    duplicate: bool,
    completion_seen: bool,
    started_at_ms: i64,
    report: Option<ReceptionReport>,
}

impl TransferSession {
    /// Starts a reception. A transfer already saved under the same label and
    /// hash finishes right here as a successful no-op receipt.
    pub fn begin(
        context: Arc<ReceptionContext>,
        request: TransferRequest,
        attempt: u32,
        max_attempts: u32,
    ) -> AppResult<Self> {
        let settings = context.settings();
        std::fs::create_dir_all(&settings.incoming_dir).map_err(|error| {
            AppError::new(
                "transport_destination_unavailable",
                "Failed to prepare download directory",
            )
            .with_source(error)
            .with_context("path", sanitize_path(&settings.incoming_dir))
        })?;
        let destination = settings
            .incoming_dir
            .join(format!("{}.{PART_EXTENSION}", uuid::Uuid::new_v4().simple()));
        let progress = ProgressTracker::new(
            request.expected_byte_length,
            settings.progress_interval_ms,
            settings.speed_window as usize,
        );
        let ticker = abbreviate_name(
            request.transfer_name.as_str(),
            settings.ticker_max_len as usize,
        );
        let correlation_id = context.next_correlation_id();
        let started_at_ms = context.now_millis();

        let mut session = Self {
            context,
            request,
            correlation_id,
            destination,
            attempt: attempt.max(1),
            max_attempts: max_attempts.max(attempt).max(1),
            state: SessionState::Receiving,
            progress,
            ticker,
            duplicate: false,
            completion_seen: false,
            started_at_ms,
            report: None,
        };

        let lookup = session.context.duplicates().lookup(
            session.request.transfer_name.as_str(),
            session.request.expected_hash.as_str(),
        );
        if let DuplicateLookup::Found(entry) = lookup {
            session.finish_duplicate(entry.size_bytes);
            return Ok(session);
        }

        tracing::info!(
            event = "reception_started",
            correlation_id = %session.correlation_id,
            label = %sanitize_for_log(session.request.transfer_name.as_str()),
            sender = %sanitize_for_log(session.request.sender.id.as_str()),
            expected_bytes = session.request.expected_byte_length,
            attempt = session.attempt,
            max_attempts = session.max_attempts,
        );
        let started = ProgressUpdate {
            correlation_id: session.correlation_id,
            percent: Some(0),
            speed_bps: 0,
            eta_seconds: None,
            message: format!(
                "Download started: {} from {}",
                session.ticker,
                session.request.sender.display()
            ),
        };
        session.context.post_progress(&started);
        Ok(session)
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn destination(&self) -> &Path {
        self.destination.as_path()
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    pub fn report(&self) -> Option<&ReceptionReport> {
        self.report.as_ref()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Feeds a byte-progress callback. Ignored once the session left
    /// `Receiving`.
    pub fn on_progress(
        &mut self,
        bytes_transferred: u64,
        total_expected: u64,
        attempt: u32,
        max_attempts: u32,
    ) {
        if self.state != SessionState::Receiving {
            return;
        }
        self.attempt = attempt.max(self.attempt);
        self.max_attempts = max_attempts.max(self.max_attempts);

        let now = self.context.now_millis();
        if !self.progress.content_received(bytes_transferred, total_expected, now) {
            return;
        }

        let message = if self.attempt > 1 {
            format!(
                "Receiving {} (attempt {} of {})",
                self.ticker, self.attempt, self.max_attempts
            )
        } else {
            format!("Receiving {}", self.ticker)
        };
        let update = ProgressUpdate {
            correlation_id: self.correlation_id,
            percent: self.progress.current_progress(),
            speed_bps: self.progress.average_speed(),
            eta_seconds: self.progress.time_remaining().map(|eta| eta.as_secs()),
            message,
        };
        self.context.post_progress(&update);
        self.progress.notified(now);
    }

    /// Reports a failed attempt. Only the last allowed attempt ends the
    /// session; earlier ones just notify.
    pub fn on_attempt_failed(
        &mut self,
        reason: &str,
        attempt: u32,
        max_attempts: u32,
    ) -> AppResult<Option<ReceptionReport>> {
        self.ensure_not_finalized()?;
        self.attempt = attempt;
        self.max_attempts = max_attempts;

        let reason = reason.trim();
        let message = format!("Attempt {attempt} of {max_attempts} failed for {}", self.ticker);
        let message = if reason.is_empty() {
            message
        } else {
            format!("{message}: {reason}")
        };
        tracing::warn!(
            event = "reception_attempt_failed",
            correlation_id = %self.correlation_id,
            attempt,
            max_attempts,
            reason = %sanitize_for_log(reason),
        );
        self.context
            .post_attempt_failed(self.correlation_id, attempt, max_attempts, message.as_str());

        if attempt < max_attempts {
            return Ok(None);
        }
        self.completion_seen = true;
        let error = transport_error(reason);
        Ok(Some(self.finish_failure(error)))
    }

    /// Drives verification, classification, interception and policy
    /// processing to a single terminal outcome.
    ///
    /// Pipeline failures are reported through the returned report and one
    /// terminal notification; `Err` is reserved for calls on a session that
    /// is already finished.
    pub fn on_complete(
        &mut self,
        success: bool,
        failure_reason: &str,
        attempt: u32,
    ) -> AppResult<ReceptionReport> {
        if self.duplicate && !self.completion_seen {
            self.completion_seen = true;
            // the transport may have fetched the payload anyway
            remove_quietly(&self.destination, "reception_temp_cleanup_failed");
            if let Some(report) = self.report.clone() {
                return Ok(report);
            }
        }
        self.ensure_not_finalized()?;
        self.completion_seen = true;
        self.attempt = attempt.max(self.attempt);

        if !success {
            return Ok(self.finish_failure(transport_error(failure_reason)));
        }

        match self.process() {
            Ok(completed) => Ok(self.finish_success(completed)),
            Err(error) => Ok(self.finish_failure(error)),
        }
    }

    /// Ends a live session as a cancelled transfer, with the usual single
    /// failed terminal notice. A session that already finished only loses
    /// whatever payload is left at its destination.
    pub fn cancel(&mut self, reason: &str) -> Option<ReceptionReport> {
        if self.state.is_done() {
            self.completion_seen = true;
            remove_quietly(&self.destination, "reception_temp_cleanup_failed");
            return None;
        }
        self.completion_seen = true;
        let reason = reason.trim();
        let error = AppError::new("transport_cancelled", "Transfer was cancelled");
        let error = if reason.is_empty() {
            error
        } else {
            error.with_cause(reason)
        };
        Some(self.finish_failure(error))
    }

    fn ensure_not_finalized(&self) -> AppResult<()> {
        if self.state.is_done() {
            return Err(AppError::new(
                "session_already_finalized",
                "Reception has already finished",
            )
            .with_context("correlationId", self.correlation_id.to_string()));
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            event = "reception_state_changed",
            correlation_id = %self.correlation_id,
            from = self.state.as_str(),
            to = next.as_str(),
        );
        self.state = next;
    }

    fn process(&mut self) -> AppResult<Completed> {
        self.transition(SessionState::Verifying);
        verify_download(
            &self.destination,
            self.request.expected_byte_length,
            self.request.expected_hash.as_str(),
        )?;
        let size_bytes = std::fs::metadata(&self.destination)
            .map(|metadata| metadata.len())
            .unwrap_or(self.request.expected_byte_length);
        let content_hash = if self.request.expected_hash.is_empty() {
            file_hash_hex(&self.destination)?
        } else {
            self.request.expected_hash.clone()
        };

        self.transition(SessionState::Classifying);
        let class = self.context.classifier.classify(&self.destination)?;
        tracing::debug!(
            event = "reception_classified",
            correlation_id = %self.correlation_id,
            class = class.label(),
        );

        let event = match class {
            ContentClass::SingleEvent(event) => event,
            ContentClass::Archive => return self.process_archive(content_hash, size_bytes),
        };

        self.context
            .registrar
            .register_single_event(&event)
            .map_err(|error| {
                let source_code = error.code.clone();
                error
                    .with_code("registration_failed", "Failed to import received event")
                    .with_context("sourceCode", source_code)
            })?;
        remove_quietly(&self.destination, "reception_temp_cleanup_failed");
        self.context.record_transfer(TransferLogEntry {
            direction: TransferLogDirection::Received,
            label: self.request.transfer_name.clone(),
            description: format!("event from {}", self.request.sender.display()),
            size_bytes,
            at_ms: self.context.now_millis(),
        });
        Ok(Completed {
            message: format!(
                "Received event {}",
                event.callsign.as_deref().unwrap_or(event.uid.as_str())
            ),
            focus: Some(FocusTarget::Event(event.uid.clone())),
            intercepted: false,
            saved_path: None,
        })
    }

    fn process_archive(&mut self, content_hash: String, size_bytes: u64) -> AppResult<Completed> {
        let manifest = self.context.decoder.manifest_only(&self.destination)?;
        if !manifest.is_valid() {
            return Err(AppError::new("archive_manifest_invalid", "Package manifest is incomplete")
                .with_context("uid", sanitize_for_log(manifest.uid.as_str())));
        }

        let meta = TransferMeta {
            correlation_id: self.correlation_id,
            transfer_name: self.request.transfer_name.clone(),
            sender: self.request.sender.clone(),
            archive_path: self.destination.clone(),
            size_bytes,
            content_hash: content_hash.clone(),
        };
        if self.context.interceptors.dispatch(&meta, &manifest) {
            self.transition(SessionState::Intercepted);
            remove_quietly(&self.destination, "reception_temp_cleanup_failed");
            return Ok(Completed {
                message: format!("{} handed off", self.ticker),
                focus: None,
                intercepted: true,
                saved_path: None,
            });
        }

        self.transition(SessionState::PolicyProcessing);
        let outcome = self.context.policy_engine().apply(PolicyInput {
            correlation_id: self.correlation_id,
            archive_path: &self.destination,
            request: &self.request,
            manifest: &manifest,
            content_hash: content_hash.as_str(),
            size_bytes,
        })?;

        Ok(Completed {
            message: format!("Received {} from {}", self.ticker, self.request.sender.display()),
            focus: outcome.focus,
            intercepted: false,
            saved_path: outcome.saved_path,
        })
    }

    fn finish_success(&mut self, completed: Completed) -> ReceptionReport {
        self.transition(SessionState::Notifying);
        let report = ReceptionReport {
            correlation_id: self.correlation_id,
            succeeded: true,
            message: completed.message,
            focus: completed.focus,
            failure: None,
            duplicate: false,
            intercepted: completed.intercepted,
            saved_path: completed.saved_path,
        };
        tracing::info!(
            event = "reception_completed",
            correlation_id = %self.correlation_id,
            intercepted = report.intercepted,
            saved = report.saved_path.is_some(),
        );
        self.finalize(report, Outcome::Success)
    }

    fn finish_failure(&mut self, error: AppError) -> ReceptionReport {
        remove_quietly(&self.destination, "reception_temp_cleanup_failed");
        self.transition(SessionState::Notifying);
        tracing::warn!(
            event = "reception_failed",
            correlation_id = %self.correlation_id,
            kind = error.kind().as_str(),
            error_code = error.code.as_str(),
            error_detail = %error,
        );
        let report = ReceptionReport {
            correlation_id: self.correlation_id,
            succeeded: false,
            message: format!("{} failed: {}", self.ticker, error.user_message()),
            focus: None,
            failure: Some(InvokeError::from(error)),
            duplicate: false,
            intercepted: false,
            saved_path: None,
        };
        self.finalize(report, Outcome::Failure)
    }

    fn finish_duplicate(&mut self, size_bytes: u64) {
        self.duplicate = true;
        tracing::info!(
            event = "reception_duplicate_skipped",
            correlation_id = %self.correlation_id,
            label = %sanitize_for_log(self.request.transfer_name.as_str()),
        );
        self.context.record_transfer(TransferLogEntry {
            direction: TransferLogDirection::Received,
            label: self.request.transfer_name.clone(),
            description: format!(
                "already received from {}, skipped",
                self.request.sender.display()
            ),
            size_bytes,
            at_ms: self.context.now_millis(),
        });
        let report = ReceptionReport {
            correlation_id: self.correlation_id,
            succeeded: true,
            message: format!("{} already received, skipped", self.ticker),
            focus: None,
            failure: None,
            duplicate: true,
            intercepted: false,
            saved_path: None,
        };
        self.transition(SessionState::Notifying);
        self.finalize(report, Outcome::Success);
    }

    fn finalize(&mut self, report: ReceptionReport, outcome: Outcome) -> ReceptionReport {
        let notice = TerminalNotice {
            correlation_id: self.correlation_id,
            succeeded: report.succeeded,
            message: report.message.clone(),
            focus: report.focus.clone(),
            failure: report.failure_kind(),
        };
        self.context.post_terminal(&notice);
        self.transition(SessionState::Done(outcome));
        self.report = Some(report.clone());
        report
    }
}

fn transport_error(reason: &str) -> AppError {
    let reason = reason.trim();
    let error = AppError::new("transport_failed", "Transfer did not complete");
    if reason.is_empty() {
        error
    } else {
        error.with_cause(reason)
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        if self.state.is_done() {
            return;
        }
        tracing::warn!(
            event = "reception_abandoned",
            correlation_id = %self.correlation_id,
            state = self.state.as_str(),
        );
        remove_quietly(&self.destination, "reception_temp_cleanup_failed");
    }
}

#[cfg(test)]
#[path = "../tests/reception/session_tests.rs"]
mod tests;
