use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pkgrecv_kernel::clock::{Clock, SystemClock};

use crate::archive::{ArchiveDecoder, ZipArchiveDecoder};
use crate::catalog::Catalog;
use crate::classifier::ContentClassifier;
use crate::collaborators::{
    ContentRegistrar, NoopContentRegistrar, NoopNotificationSink, NoopPostReceiveDispatcher,
    NotificationSink, PostReceiveDispatcher,
};
use crate::duplicate::DuplicateRegistry;
use crate::interceptor::InterceptorChain;
use crate::models::{CorrelationId, ProgressUpdate, TerminalNotice, TransferLogEntry};
use crate::policy::ImportPolicyEngine;
use crate::settings::ReceptionSettings;

/// Everything a reception needs from the surrounding application.
///
/// Built once at startup and shared by every session; collaborators are
/// injected here instead of being looked up globally.
pub struct ReceptionContext {
    pub(crate) settings: ReceptionSettings,
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) decoder: Arc<dyn ArchiveDecoder>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) registrar: Arc<dyn ContentRegistrar>,
    pub(crate) dispatcher: Arc<dyn PostReceiveDispatcher>,
    pub(crate) interceptors: Arc<InterceptorChain>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) classifier: ContentClassifier,
    next_correlation: AtomicU64,
}

impl ReceptionContext {
    pub fn new(settings: ReceptionSettings, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            settings: settings.normalized(),
            catalog,
            decoder: Arc::new(ZipArchiveDecoder),
            notifier: Arc::new(NoopNotificationSink),
            registrar: Arc::new(NoopContentRegistrar),
            dispatcher: Arc::new(NoopPostReceiveDispatcher),
            interceptors: Arc::new(InterceptorChain::new()),
            clock: Arc::new(SystemClock),
            classifier: ContentClassifier::default(),
            next_correlation: AtomicU64::new(0),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn ArchiveDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn ContentRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn PostReceiveDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_interceptors(mut self, interceptors: Arc<InterceptorChain>) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ReceptionSettings {
        &self.settings
    }

    pub fn interceptors(&self) -> &Arc<InterceptorChain> {
        &self.interceptors
    }

    pub fn duplicates(&self) -> DuplicateRegistry {
        DuplicateRegistry::new(self.catalog.clone())
    }

    pub fn policy_engine(&self) -> ImportPolicyEngine<'_> {
        ImportPolicyEngine::new(self)
    }

    pub(crate) fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub(crate) fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId(self.next_correlation.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn post_progress(&self, update: &ProgressUpdate) {
        if let Err(error) = self.notifier.post_progress(update) {
            tracing::warn!(
                event = "notification_progress_failed",
                correlation_id = %update.correlation_id,
                error_code = error.code.as_str(),
                error_detail = %error,
            );
        }
    }

    pub(crate) fn post_terminal(&self, notice: &TerminalNotice) {
        if let Err(error) = self.notifier.post_terminal(notice) {
            tracing::warn!(
                event = "notification_terminal_failed",
                correlation_id = %notice.correlation_id,
                error_code = error.code.as_str(),
                error_detail = %error,
            );
        }
    }

    pub(crate) fn post_attempt_failed(
        &self,
        correlation_id: CorrelationId,
        attempt: u32,
        max_attempts: u32,
        message: &str,
    ) {
        if let Err(error) =
            self.notifier
                .post_attempt_failed(correlation_id, attempt, max_attempts, message)
        {
            tracing::warn!(
                event = "notification_attempt_failed_failed",
                correlation_id = %correlation_id,
                error_code = error.code.as_str(),
                error_detail = %error,
            );
        }
    }

    pub(crate) fn record_transfer(&self, entry: TransferLogEntry) {
        if let Err(error) = self.catalog.insert_transfer_log(entry) {
            tracing::warn!(
                event = "transfer_log_write_failed",
                error_code = error.code.as_str(),
                error_detail = %error,
            );
        }
    }
}
