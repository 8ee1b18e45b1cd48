//! Stickerbatch Common Utilities
//!
//! Shared infrastructure for all Stickerbatch crates:
//! - Error types and result aliases
//! - Tracing/logging initialization
//! - Configuration loading
//! - Key-value preference storage for the surrounding front end

pub mod config;
pub mod error;
pub mod logging;
pub mod preferences;

pub use config::*;
pub use error::*;
pub use preferences::*;
