pub mod archive;
pub mod catalog;
pub mod classifier;
pub mod collaborators;
pub mod context;
pub mod duplicate;
mod files;
pub mod integrity;
pub mod interceptor;
pub mod naming;
pub mod policy;
pub mod progress;
pub mod service;
pub mod session;
pub mod settings;
pub mod sweep;

#[cfg(test)]
#[path = "../tests/reception/support.rs"]
pub(crate) mod test_support;

pub use pkgrecv_protocol::models;
pub use pkgrecv_protocol::{
    AppError, AppResult, FailureKind, IntegrityFailure, InvokeError, ResultExt,
};
