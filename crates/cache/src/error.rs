//! Size cache error types.

use thiserror::Error;

/// Size cache operation errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal cache error: {0}")]
    Internal(String),
}

/// Result type for size cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
