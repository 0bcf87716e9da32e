//! Service error taxonomy.

use canopy_cache::CacheError;
use canopy_metadata::MetadataError;
use canopy_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the settlement engine and the mutation service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("moving folder {folder_id} under {new_parent_id} would create a cycle")]
    CycleDetected { folder_id: i64, new_parent_id: i64 },

    #[error("conflict: {0}")]
    Conflict(String),

    /// The durable store, the cache or the blob store failed.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

impl From<MetadataError> for ServiceError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(msg) => Self::NotFound(msg),
            MetadataError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            MetadataError::CycleDetected {
                folder_id,
                new_parent_id,
            } => Self::CycleDetected {
                folder_id,
                new_parent_id,
            },
            MetadataError::Conflict(msg) => Self::Conflict(msg),
            MetadataError::Database(e) => Self::StorageFailure(format!("metadata store: {e}")),
            MetadataError::Io(e) => Self::StorageFailure(format!("metadata store: {e}")),
            MetadataError::Config(msg) | MetadataError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        Self::StorageFailure(format!("size cache: {err}"))
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            other => Self::StorageFailure(format!("blob store: {other}")),
        }
    }
}

impl From<canopy_core::Error> for ServiceError {
    fn from(err: canopy_core::Error) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
