//! HTTP client module for backend collaborators
//!
//! Provides the HTTP client used by the built-in operations.

mod client;

pub use client::{HttpClient, RetryPolicy};
