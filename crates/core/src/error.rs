//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid transaction status: {0}")]
    InvalidStatus(String),

    #[error("invalid size: {0} (sizes must be non-negative)")]
    InvalidSize(i64),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
