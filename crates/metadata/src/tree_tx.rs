//! Row-level operations executed inside one open durable transaction.

use crate::error::MetadataResult;
use crate::models::{FileRow, FolderRow, FolderSize, NewFile, UploadTransactionRow};
use async_trait::async_trait;
use canopy_core::TransactionStatus;

/// A unit of work on the folder tree.
///
/// Every method runs on the same database transaction. Nothing becomes
/// visible to other readers until [`commit`](TreeTransaction::commit);
/// dropping the handle without committing rolls everything back.
///
/// On PostgreSQL, folder and upload transaction reads take row locks so
/// concurrent walks over a shared ancestor chain serialize.
#[async_trait]
pub trait TreeTransaction: Send {
    // -- folders --

    async fn get_folder(&mut self, id: i64) -> MetadataResult<Option<FolderRow>>;

    /// Add `delta` to one folder's size. `NotFound` if the row is missing.
    async fn add_size(&mut self, id: i64, delta: i64) -> MetadataResult<()>;

    /// Overwrite one folder's size. `NotFound` if the row is missing.
    async fn set_size(&mut self, id: i64, size: i64) -> MetadataResult<()>;

    /// Overwrite many folder sizes with one batched statement.
    /// Returns the number of rows updated.
    async fn set_sizes(&mut self, sizes: &[FolderSize]) -> MetadataResult<u64>;

    async fn set_parent(&mut self, id: i64, parent_id: i64) -> MetadataResult<()>;

    async fn child_ids(&mut self, id: i64) -> MetadataResult<Vec<i64>>;

    async fn delete_folder_row(&mut self, id: i64) -> MetadataResult<()>;

    // -- files --

    async fn insert_file(&mut self, file: &NewFile) -> MetadataResult<FileRow>;

    async fn get_file(&mut self, id: i64) -> MetadataResult<Option<FileRow>>;

    async fn delete_file_row(&mut self, id: i64) -> MetadataResult<()>;

    async fn set_file_folder(&mut self, id: i64, folder_id: i64) -> MetadataResult<()>;

    /// Delete the files directly inside `folder_id`, returning them.
    async fn delete_files_in_folder(&mut self, folder_id: i64) -> MetadataResult<Vec<FileRow>>;

    /// Delete every file attached to an upload transaction, returning them.
    async fn delete_files_for_transaction(
        &mut self,
        transaction_id: i64,
    ) -> MetadataResult<Vec<FileRow>>;

    /// Sum of the sizes of the files attached to an upload transaction.
    async fn transaction_file_total(&mut self, transaction_id: i64) -> MetadataResult<i64>;

    // -- upload transactions --

    async fn get_transaction(&mut self, id: i64) -> MetadataResult<Option<UploadTransactionRow>>;

    /// Move a `pending` transaction to `status`, optionally recording the
    /// settled total. `Conflict` if the row is no longer pending.
    async fn set_transaction_status(
        &mut self,
        id: i64,
        status: TransactionStatus,
        total_size: Option<i64>,
    ) -> MetadataResult<()>;

    /// Number of pending transactions targeting `folder_id`.
    async fn pending_transactions_in_folder(&mut self, folder_id: i64) -> MetadataResult<i64>;

    async fn delete_transactions_in_folder(&mut self, folder_id: i64) -> MetadataResult<u64>;

    // -- lifecycle --

    async fn commit(self: Box<Self>) -> MetadataResult<()>;

    async fn rollback(self: Box<Self>) -> MetadataResult<()>;
}
