//! camcast Common Utilities
//!
//! Shared infrastructure for all camcast crates:
//! - Error types and result aliases
//! - Frame-rate pacing and wall-clock labels
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
