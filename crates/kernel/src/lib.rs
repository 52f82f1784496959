pub mod clock;
pub mod runtime;
pub mod sync;

pub use pkgrecv_protocol::models;
pub use pkgrecv_protocol::{AppError, AppResult, ResultExt};
