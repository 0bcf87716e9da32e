//! File repository.

use crate::error::MetadataResult;
use crate::models::FileRow;
use async_trait::async_trait;

/// Read access to file records. Inserts, moves and deletes change folder
/// sizes and therefore run through a [`TreeTransaction`](crate::TreeTransaction).
#[async_trait]
pub trait FileRepo: Send + Sync {
    async fn get_file(&self, id: i64) -> MetadataResult<Option<FileRow>>;

    /// Files directly inside `folder_id`, ordered by id.
    async fn list_files(&self, folder_id: i64) -> MetadataResult<Vec<FileRow>>;
}
