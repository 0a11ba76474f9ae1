//! Shared utilities

pub mod fs;
pub mod logger;
pub mod timer;

pub use logger::{init_logger, LogLevel};
pub use timer::{round_secs, Timer};
