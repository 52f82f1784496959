mod blocking;

pub use blocking::run_blocking;
