//! # cw-core
//!
//! Core types and error handling for Causeway.
//!
//! This crate provides:
//! - The error taxonomy shared by every pipeline stage
//! - The column-stored [`Dataset`] value type and its ingestion boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
pub mod error;

pub use dataset::Dataset;
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
