//! Size cache trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;

/// String-keyed store of signed byte counts.
///
/// The cache is advisory: entries may vanish at any time and callers treat a
/// missing key as "nothing staged". No ordering or transactional guarantee
/// is offered between calls.
#[async_trait]
pub trait SizeCache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<i64>>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: i64) -> CacheResult<()>;

    /// Values for the keys that are present, in request order. Missing keys
    /// are skipped.
    async fn multi_get(&self, keys: &[String]) -> CacheResult<Vec<(String, i64)>>;

    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Add `delta` to a value, treating a missing key as zero. Returns the new value.
    ///
    /// A key whose value returns to zero is removed. The default is a plain
    /// read followed by a write; concurrent increments may lose updates
    /// unless the backend overrides this.
    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let value = self.get(key).await?.unwrap_or(0).saturating_add(delta);
        if value == 0 {
            self.remove(key).await?;
        } else {
            self.set(key, value).await?;
        }
        Ok(value)
    }

    /// Drop expired entries held by this process, returning how many went.
    /// Backends that expire keys on their own have nothing to do.
    async fn purge_expired(&self) -> CacheResult<usize> {
        Ok(0)
    }

    /// Check cache availability.
    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }
}
