use std::collections::BTreeMap;
use std::path::Path;

use crate::AppResult;
use crate::models::{
    ContentEntry, CorrelationId, Manifest, ProgressUpdate, SingleEvent, TerminalNotice,
};

/// UI-facing sink for progress and outcome notifications.
///
/// Errors returned here are logged by the caller and never fail a transfer.
pub trait NotificationSink: Send + Sync {
    fn post_progress(&self, update: &ProgressUpdate) -> AppResult<()>;
    fn post_terminal(&self, notice: &TerminalNotice) -> AppResult<()>;
    fn post_attempt_failed(
        &self,
        correlation_id: CorrelationId,
        attempt: u32,
        max_attempts: u32,
        message: &str,
    ) -> AppResult<()>;
}

pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn post_progress(&self, _update: &ProgressUpdate) -> AppResult<()> {
        Ok(())
    }

    fn post_terminal(&self, _notice: &TerminalNotice) -> AppResult<()> {
        Ok(())
    }

    fn post_attempt_failed(
        &self,
        _correlation_id: CorrelationId,
        _attempt: u32,
        _max_attempts: u32,
        _message: &str,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Ingests received content into the application's live data.
pub trait ContentRegistrar: Send + Sync {
    fn register_file_entry(&self, path: &Path, parameters: &BTreeMap<String, String>)
    -> AppResult<()>;
    fn register_map_item(&self, entry: &ContentEntry) -> AppResult<()>;
    fn register_single_event(&self, event: &SingleEvent) -> AppResult<()>;
}

pub struct NoopContentRegistrar;

impl ContentRegistrar for NoopContentRegistrar {
    fn register_file_entry(
        &self,
        _path: &Path,
        _parameters: &BTreeMap<String, String>,
    ) -> AppResult<()> {
        Ok(())
    }

    fn register_map_item(&self, _entry: &ContentEntry) -> AppResult<()> {
        Ok(())
    }

    fn register_single_event(&self, _event: &SingleEvent) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PostReceiveContext<'a> {
    pub correlation_id: CorrelationId,
    pub sender_name: &'a str,
    pub manifest: &'a Manifest,
}

/// Delivers a package's post-receive action to whoever registered for it.
pub trait PostReceiveDispatcher: Send + Sync {
    fn dispatch(&self, action: &str, context: PostReceiveContext<'_>) -> AppResult<()>;
}

pub struct NoopPostReceiveDispatcher;

impl PostReceiveDispatcher for NoopPostReceiveDispatcher {
    fn dispatch(&self, _action: &str, _context: PostReceiveContext<'_>) -> AppResult<()> {
        Ok(())
    }
}
