//! Application state shared across handlers.

use crate::services::{MutationService, SettlementEngine};
use canopy_cache::SizeCache;
use canopy_core::config::AppConfig;
use canopy_metadata::MetadataStore;
use canopy_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Folder tree store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Staging area for transaction deltas.
    pub cache: Arc<dyn SizeCache>,
    /// File content storage.
    pub blobs: Arc<dyn BlobStore>,
    pub settlement: Arc<SettlementEngine>,
    pub mutations: Arc<MutationService>,
}

impl AppState {
    /// Wire the services over the given stores.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<dyn SizeCache>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let settlement = Arc::new(SettlementEngine::new(
            Arc::clone(&metadata),
            Arc::clone(&cache),
            Arc::clone(&blobs),
        ));
        let mutations = Arc::new(MutationService::new(
            Arc::clone(&metadata),
            Arc::clone(&blobs),
            Arc::clone(&settlement),
        ));

        Self {
            config: Arc::new(config),
            metadata,
            cache,
            blobs,
            settlement,
            mutations,
        }
    }
}
