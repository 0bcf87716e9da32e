//! Folder repository.

use crate::error::MetadataResult;
use crate::models::{FolderRow, NewFolder};
use async_trait::async_trait;

/// Repository for folder reads and creation.
///
/// Size changes never go through this trait; they are applied by the
/// propagation engine inside a [`TreeTransaction`](crate::TreeTransaction).
#[async_trait]
pub trait FolderRepo: Send + Sync {
    /// Insert a folder with size zero.
    ///
    /// Fails with `NotFound` when the parent does not exist and with
    /// `InvalidArgument` when the name is blank.
    async fn create_folder(&self, folder: &NewFolder) -> MetadataResult<FolderRow>;

    async fn get_folder(&self, id: i64) -> MetadataResult<Option<FolderRow>>;

    /// Direct children ordered by id.
    async fn list_children(&self, id: i64) -> MetadataResult<Vec<FolderRow>>;

    /// Root folders belonging to `owner_id`, ordered by id.
    async fn list_root_folders(&self, owner_id: i64) -> MetadataResult<Vec<FolderRow>>;
}
