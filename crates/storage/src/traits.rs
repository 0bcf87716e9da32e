//! Blob store trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Opaque storage for uploaded file contents.
///
/// Callers keep only the URL returned by [`upload`](BlobStore::upload) and
/// never interpret it.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under a fresh key derived from `name` and return its URL.
    async fn upload(&self, data: Bytes, name: &str) -> StorageResult<String>;

    /// Remove the blob behind `url`. Missing blobs are not an error.
    async fn delete(&self, url: &str) -> StorageResult<()>;

    /// Check backend health and connectivity.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is not reachable or misconfigured.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
