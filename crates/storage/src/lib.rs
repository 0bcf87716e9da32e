//! Blob storage for canopy file contents.
//!
//! File bodies are handed to a [`BlobStore`], which returns an opaque URL
//! recorded with the file's metadata. Only a local filesystem backend ships
//! today.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::BlobStore;

use canopy_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem {
            path,
            public_base_url,
        } => {
            let backend = FilesystemBackend::new(path, public_base_url.as_deref()).await?;
            Ok(Arc::new(backend))
        }
    }
}
