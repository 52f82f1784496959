use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use pkgrecv_kernel::runtime::run_blocking;
use pkgrecv_kernel::sync::{lock_mutex, read_lock, write_lock};

use crate::context::ReceptionContext;
use crate::interceptor::InterceptorChain;
use crate::models::{CorrelationId, TransferRequest};
use crate::session::{ReceptionReport, TransferSession};
use crate::sweep::sweep_orphaned_downloads;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginOutcome {
    pub handle: SessionHandle,
    pub correlation_id: CorrelationId,
    /// Temp file the transport writes the payload to.
    pub destination: PathBuf,
    /// The transfer is already saved; the transport may skip the download
    /// and call `on_complete` right away.
    pub already_received: bool,
}

type SharedSession = Arc<Mutex<TransferSession>>;

/// Entry point for transports: issues session handles and routes callbacks
/// to the owning session, one caller at a time per session.
pub struct ReceptionService {
    context: Arc<ReceptionContext>,
    next_handle: AtomicU64,
    sessions: RwLock<HashMap<SessionHandle, SharedSession>>,
}

impl ReceptionService {
    pub fn new(context: ReceptionContext) -> Self {
        Self::from_shared(Arc::new(context))
    }

    pub fn from_shared(context: Arc<ReceptionContext>) -> Self {
        Self {
            context,
            next_handle: AtomicU64::new(0),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<ReceptionContext> {
        &self.context
    }

    pub fn interceptors(&self) -> &Arc<InterceptorChain> {
        self.context.interceptors()
    }

    pub fn begin_reception(&self, request: TransferRequest) -> AppResult<BeginOutcome> {
        self.begin_attempt(request, 1, 1)
    }

    pub fn begin_attempt(
        &self,
        request: TransferRequest,
        attempt: u32,
        max_attempts: u32,
    ) -> AppResult<BeginOutcome> {
        let session = TransferSession::begin(self.context.clone(), request, attempt, max_attempts)?;
        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let outcome = BeginOutcome {
            handle,
            correlation_id: session.correlation_id(),
            destination: session.destination().to_path_buf(),
            already_received: session.is_duplicate(),
        };
        write_lock(&self.sessions, "reception_sessions")
            .insert(handle, Arc::new(Mutex::new(session)));
        Ok(outcome)
    }

    pub fn on_progress(
        &self,
        handle: SessionHandle,
        bytes_transferred: u64,
        total_expected: u64,
        attempt: u32,
        max_attempts: u32,
    ) -> AppResult<()> {
        let session = self.session(handle)?;
        lock_mutex(session.as_ref(), "transfer_session").on_progress(
            bytes_transferred,
            total_expected,
            attempt,
            max_attempts,
        );
        Ok(())
    }

    /// Returns the final report once the last attempt has failed.
    pub fn on_attempt_failed(
        &self,
        handle: SessionHandle,
        reason: &str,
        attempt: u32,
        max_attempts: u32,
    ) -> AppResult<Option<ReceptionReport>> {
        let session = self.session(handle)?;
        let report = lock_mutex(session.as_ref(), "transfer_session").on_attempt_failed(
            reason,
            attempt,
            max_attempts,
        )?;
        if report.is_some() {
            self.forget(handle);
        }
        Ok(report)
    }

    /// Runs the completion pipeline on the calling thread.
    pub fn on_complete(
        &self,
        handle: SessionHandle,
        success: bool,
        failure_reason: &str,
        attempt: u32,
    ) -> AppResult<ReceptionReport> {
        let session = self.session(handle)?;
        let report = lock_mutex(session.as_ref(), "transfer_session").on_complete(
            success,
            failure_reason,
            attempt,
        )?;
        self.forget(handle);
        Ok(report)
    }

    /// [`Self::on_complete`] on tokio's blocking pool.
    pub async fn complete_async(
        self: &Arc<Self>,
        handle: SessionHandle,
        success: bool,
        failure_reason: String,
        attempt: u32,
    ) -> AppResult<ReceptionReport> {
        let service = self.clone();
        run_blocking("reception_complete", move || {
            service.on_complete(handle, success, failure_reason.as_str(), attempt)
        })
        .await
    }

    /// Gives up on a session. A live one ends as a cancelled transfer with
    /// one failed terminal notice; either way its temp file is removed.
    pub fn release(&self, handle: SessionHandle) -> Option<ReceptionReport> {
        let session = self.take(handle)?;
        lock_mutex(session.as_ref(), "transfer_session").cancel("released by transport")
    }

    pub fn active_sessions(&self) -> usize {
        read_lock(&self.sessions, "reception_sessions").len()
    }

    /// Retires finished sessions nobody acknowledged within the configured
    /// age, then removes leftover downloads that no live session owns.
    pub fn sweep_orphans(&self) -> AppResult<usize> {
        let settings = self.context.settings();
        let max_age = Duration::from_secs(u64::from(settings.orphan_max_age_hours) * 3600);
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.context.now_millis().saturating_sub(max_age_ms);

        let sessions: Vec<(SessionHandle, SharedSession)> =
            read_lock(&self.sessions, "reception_sessions")
                .iter()
                .map(|(handle, session)| (*handle, session.clone()))
                .collect();
        let mut in_use = HashSet::new();
        for (handle, session) in sessions {
            let mut session = lock_mutex(session.as_ref(), "transfer_session");
            if session.state().is_done() && session.started_at_ms() <= cutoff {
                session.cancel("");
                self.forget(handle);
                tracing::info!(
                    event = "reception_session_retired",
                    handle = handle.0,
                    correlation_id = %session.correlation_id(),
                );
                continue;
            }
            in_use.insert(session.destination().to_path_buf());
        }

        sweep_orphaned_downloads(&settings.incoming_dir, max_age, &in_use)
    }

    fn session(&self, handle: SessionHandle) -> AppResult<SharedSession> {
        if let Some(session) = read_lock(&self.sessions, "reception_sessions").get(&handle) {
            return Ok(session.clone());
        }

        // handles are issued in order, so a known-but-absent one has finished
        if handle.0 > 0 && handle.0 <= self.next_handle.load(Ordering::Relaxed) {
            return Err(AppError::new(
                "session_already_finalized",
                "Reception has already finished",
            )
            .with_context("handle", handle.0.to_string()));
        }
        Err(AppError::new("session_not_found", "Unknown reception session")
            .with_context("handle", handle.0.to_string()))
    }

    fn take(&self, handle: SessionHandle) -> Option<SharedSession> {
        write_lock(&self.sessions, "reception_sessions").remove(&handle)
    }

    fn forget(&self, handle: SessionHandle) {
        self.take(handle);
    }
}

#[cfg(test)]
#[path = "../tests/reception/service_tests.rs"]
mod tests;
