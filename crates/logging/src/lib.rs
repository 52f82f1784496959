pub mod logging;

pub use logging::*;

pub use pkgrecv_protocol::{AppError, AppResult, ResultExt};
