//! LandWatch Common Library
//!
//! Shared types and utilities for the LandWatch ingestion workspace:
//!
//! - **Error Handling**: the `LandwatchError` type and `Result` alias
//! - **Fingerprinting**: deterministic content fingerprints for artifact
//!   change detection
//! - **Logging**: centralized tracing initialization
//! - **Types**: artifact, manifest and status types shared across crates

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{LandwatchError, Result};
