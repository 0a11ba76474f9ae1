//! Case loading
//!
//! Reads the input table, filters it, and publishes one case set per run.

mod loader;
mod lock;
mod table;

pub use loader::CaseLoader;
