//! Advisory size cache for canopy upload transactions.
//!
//! While a batch upload is open, sizes are staged here instead of in the
//! metadata store. Two kinds of entry exist:
//! - a snapshot of a folder's durable size, written when a transaction starts
//! - the delta accumulated by one transaction's uploads, removed once it settles
//!
//! The metadata store stays authoritative. Losing any entry is safe.

pub mod error;
pub mod memory;
pub mod redis;
pub mod traits;

pub use error::{CacheError, CacheResult};
pub use memory::MemorySizeCache;
pub use crate::redis::RedisSizeCache;
pub use traits::SizeCache;

use canopy_core::config::CacheConfig;
use std::sync::Arc;
use std::time::Duration;

/// Key of the durable size snapshot for a folder.
pub fn snapshot_key(folder_id: i64) -> String {
    format!("folder_size:{folder_id}")
}

/// Key of the bytes staged by one upload transaction.
pub fn transaction_delta_key(transaction_id: i64) -> String {
    format!("transaction_delta:{transaction_id}")
}

/// Create a size cache from configuration.
pub async fn from_config(config: &CacheConfig) -> CacheResult<Arc<dyn SizeCache>> {
    config.validate().map_err(CacheError::Config)?;

    match config {
        CacheConfig::Memory { .. } => {
            tracing::info!(ttl = ?config.ttl(), "Using in-memory size cache");
            Ok(Arc::new(MemorySizeCache::new(config.ttl())))
        }
        CacheConfig::Redis { url, .. } => {
            tracing::info!(ttl = ?config.ttl(), "Using Redis size cache");
            Ok(Arc::new(RedisSizeCache::connect(url, config.ttl()).await?))
        }
    }
}

/// Spawn a background task that periodically drops expired cache entries.
/// Returns a handle that can be used to stop the task.
pub fn spawn_purge_task(
    cache: Arc<dyn SizeCache>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => {
                    tracing::info!(purged, "Size cache purge dropped expired entries");
                }
                Err(e) => tracing::warn!(error = %e, "Size cache purge failed"),
            }
        }
    })
}
