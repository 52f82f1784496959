use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use pkgrecv_kernel::sync::{read_lock, write_lock};

use crate::models::{CorrelationId, Manifest, SenderIdentity};

/// What an interceptor learns about a package before claiming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMeta {
    pub correlation_id: CorrelationId,
    pub transfer_name: String,
    pub sender: SenderIdentity,
    /// Verified payload on disk. A claiming handler must copy what it needs
    /// before returning; the file is removed afterwards.
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    pub content_hash: String,
}

/// Handler that may take over delivery of a package.
pub trait TransferInterceptor: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `true` to claim the package; default processing is skipped.
    fn on_package_received(&self, meta: &TransferMeta, manifest: &Manifest) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

type Registered = (InterceptorId, Arc<dyn TransferInterceptor>);

/// Ordered, registration-stable list of interceptors.
#[derive(Default)]
pub struct InterceptorChain {
    next_id: AtomicU64,
    handlers: RwLock<Vec<Registered>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn TransferInterceptor>) -> InterceptorId {
        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(event = "interceptor_registered", name = handler.name(), id = id.0);
        write_lock(&self.handlers, "interceptors").push((id, handler));
        id
    }

    pub fn unregister(&self, id: InterceptorId) -> bool {
        let mut handlers = write_lock(&self.handlers, "interceptors");
        let before = handlers.len();
        handlers.retain(|(registered, _)| *registered != id);
        before != handlers.len()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.handlers, "interceptors").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offers the package to each handler in registration order and stops at
    /// the first claim. Runs on a snapshot so handlers may (un)register.
    pub fn dispatch(&self, meta: &TransferMeta, manifest: &Manifest) -> bool {
        let snapshot: Vec<Registered> = read_lock(&self.handlers, "interceptors").clone();
        for (id, handler) in snapshot {
            if handler.on_package_received(meta, manifest) {
                tracing::info!(
                    event = "transfer_intercepted",
                    correlation_id = %meta.correlation_id,
                    interceptor = handler.name(),
                    interceptor_id = id.0,
                );
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
#[path = "../tests/reception/interceptor_tests.rs"]
mod tests;
