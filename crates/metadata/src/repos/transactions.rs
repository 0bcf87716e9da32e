//! Upload transaction repository.

use crate::error::MetadataResult;
use crate::models::UploadTransactionRow;
use async_trait::async_trait;

/// Repository for upload transaction records.
#[async_trait]
pub trait TransactionRepo: Send + Sync {
    /// Create a `pending` transaction targeting `folder_id`.
    /// Fails with `NotFound` when the folder does not exist.
    async fn create_transaction(
        &self,
        owner_id: i64,
        folder_id: i64,
    ) -> MetadataResult<UploadTransactionRow>;

    async fn get_transaction(&self, id: i64) -> MetadataResult<Option<UploadTransactionRow>>;

    /// Transactions on `folder_id` that are still `pending`, oldest first.
    async fn list_pending_transactions(
        &self,
        folder_id: i64,
    ) -> MetadataResult<Vec<UploadTransactionRow>>;

    /// Mark a pending transaction `failed` when nothing was uploaded under it.
    ///
    /// Only the status row changes, so this refuses with `Conflict` once any
    /// file is recorded under the transaction. Settling or abandoning a batch
    /// with files goes through the server's settlement engine, which keeps
    /// folder sizes in step. Returns `NotFound` for an unknown id and
    /// `Conflict` when the transaction already reached a terminal state.
    async fn fail_transaction(&self, id: i64) -> MetadataResult<UploadTransactionRow>;
}
