//! Deferred settlement of batched uploads.
//!
//! A transaction is opened on one folder. Files uploaded under it are
//! inserted immediately, but their sizes are only staged as a per-transaction
//! delta in the size cache. Completing the transaction writes the folder and
//! every ancestor in one batched statement; stopping it abandons the batch
//! without touching any folder size. Either way the staged delta is dropped.

use crate::metrics::{
    LEDGER_MISMATCHES, SETTLEMENT_DURATION, record_cache_failure, record_settlement,
};
use crate::services::error::{ServiceError, ServiceResult};
use canopy_cache::{SizeCache, snapshot_key, transaction_delta_key};
use canopy_core::TransactionStatus;
use canopy_metadata::models::{FileRow, FolderSize, UploadTransactionRow};
use canopy_metadata::{MetadataStore, tree};
use canopy_storage::BlobStore;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::instrument;

/// A freshly opened transaction and its cache seeding task.
///
/// Callers never have to wait for `seeding`; tests await it to observe the
/// seeded cache deterministically.
pub struct StartedTransaction {
    pub transaction: UploadTransactionRow,
    pub seeding: JoinHandle<()>,
}

/// Runs the start, complete and stop lifecycle of upload transactions.
pub struct SettlementEngine {
    store: Arc<dyn MetadataStore>,
    cache: Arc<dyn SizeCache>,
    blobs: Arc<dyn BlobStore>,
    ledger_mismatches: AtomicU64,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        cache: Arc<dyn SizeCache>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            store,
            cache,
            blobs,
            ledger_mismatches: AtomicU64::new(0),
        }
    }

    /// Completions whose staged delta disagreed with the recorded files.
    pub fn ledger_mismatches(&self) -> u64 {
        self.ledger_mismatches.load(Ordering::Relaxed)
    }

    /// Open a pending transaction on `folder_id`.
    ///
    /// The folder and its ancestors are seeded into the cache in the
    /// background; seeding failures are logged and never reach the caller.
    #[instrument(skip(self))]
    pub async fn start(&self, owner_id: i64, folder_id: i64) -> ServiceResult<StartedTransaction> {
        let transaction = self.store.create_transaction(owner_id, folder_id).await?;
        record_settlement("started");
        tracing::info!(transaction_id = transaction.id, folder_id, "Opened upload transaction");

        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let transaction_id = transaction.id;
        let seeding = tokio::spawn(async move {
            seed_chain(store.as_ref(), cache.as_ref(), transaction_id, folder_id).await;
        });

        Ok(StartedTransaction {
            transaction,
            seeding,
        })
    }

    /// Stage `size` bytes uploaded into `folder_id` under a transaction.
    ///
    /// Callers stage while their unit of work still holds the transaction
    /// row, so a completion that locks the row afterwards reads every staged
    /// byte. The file row is the durable record; a lost cache write only
    /// costs a ledger mismatch warning at completion.
    pub async fn record_upload(&self, transaction_id: i64, folder_id: i64, size: i64) {
        self.adjust_staged(transaction_id, folder_id, size).await;
    }

    /// Undo a staged upload whose file row was removed before settlement.
    pub async fn withdraw_upload(&self, transaction_id: i64, folder_id: i64, size: i64) {
        self.adjust_staged(transaction_id, folder_id, -size).await;
    }

    async fn adjust_staged(&self, transaction_id: i64, folder_id: i64, delta: i64) {
        if delta == 0 {
            return;
        }
        tracing::trace!(transaction_id, folder_id, delta, "Staging size delta");
        let key = transaction_delta_key(transaction_id);
        if let Err(e) = self.cache.increment(&key, delta).await {
            record_cache_failure("stage");
            tracing::warn!(
                transaction_id,
                folder_id,
                delta,
                error = %e,
                "Failed to adjust staged delta"
            );
        }
    }

    /// Settle a pending transaction into the folder tree.
    ///
    /// The staged delta is checked against the files actually recorded
    /// under the transaction, and the file ledger wins on disagreement. The
    /// folder and all its ancestors are then written in one batched update
    /// together with the status change. If anything fails the transaction
    /// stays pending and `complete` may be retried.
    #[instrument(skip(self))]
    pub async fn complete(&self, id: i64) -> ServiceResult<UploadTransactionRow> {
        let started = Instant::now();
        let transaction = self.get(id).await?;
        ensure_pending(&transaction, "complete")?;
        let folder_id = transaction.folder_id;

        let mut tx = self.store.begin().await?;
        let current = tx
            .get_transaction(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {id}")))?;
        ensure_pending(&current, "complete")?;

        // Uploads stage before releasing the transaction row, so the delta
        // read under the row lock is final.
        let keys = [snapshot_key(folder_id), transaction_delta_key(id)];
        let staged = self.cache.multi_get(&keys).await.map_err(|e| {
            record_cache_failure("settle");
            ServiceError::StorageFailure(format!(
                "reading staged sizes for transaction {id}: {e}"
            ))
        })?;
        let snapshot = lookup(&staged, &keys[0]);
        let cached_delta = lookup(&staged, &keys[1]).unwrap_or(0);

        let ledger = tx.transaction_file_total(id).await?;
        let delta = if cached_delta == ledger {
            cached_delta
        } else {
            LEDGER_MISMATCHES.inc();
            self.ledger_mismatches.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                transaction_id = id,
                folder_id,
                cached_delta,
                ledger,
                "Staged delta disagrees with recorded files, settling from the file ledger"
            );
            ledger
        };

        let chain = tree::parent_chain(tx.as_mut(), folder_id).await?;
        let durable = chain.last().map(|leaf| leaf.size);
        if snapshot.is_some() && snapshot != durable {
            tracing::debug!(
                transaction_id = id,
                folder_id,
                ?snapshot,
                ?durable,
                "Folder changed since the transaction started"
            );
        }

        // Only the transaction's folder receives staged bytes, so every
        // folder on the chain moves by the same amount.
        let sizes = chain
            .iter()
            .map(|folder| {
                folder
                    .size
                    .checked_add(delta)
                    .map(|size| FolderSize {
                        id: folder.id,
                        size,
                    })
                    .ok_or_else(|| {
                        ServiceError::InvalidArgument(format!(
                            "size of folder {} would overflow",
                            folder.id
                        ))
                    })
            })
            .collect::<ServiceResult<Vec<_>>>()?;

        tree::batch_set_sizes(tx.as_mut(), &sizes).await?;
        tx.set_transaction_status(id, TransactionStatus::Completed, Some(delta))
            .await?;
        tx.commit().await?;

        SETTLEMENT_DURATION.observe(started.elapsed().as_secs_f64());
        record_settlement("completed");
        tracing::info!(
            transaction_id = id,
            folder_id,
            delta,
            folders = sizes.len(),
            "Completed upload transaction"
        );

        self.refresh_after_settle(id, &sizes).await;
        self.get(id).await
    }

    /// Abandon a pending transaction.
    ///
    /// Files uploaded under it are removed in the same unit of work as the
    /// status change, so folder sizes stay equal to the files they contain.
    /// Stopping a failed transaction again is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: i64) -> ServiceResult<UploadTransactionRow> {
        let mut tx = self.store.begin().await?;
        let current = tx
            .get_transaction(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {id}")))?;
        match current.status()? {
            TransactionStatus::Failed => {
                tx.rollback().await?;
                return Ok(current);
            }
            TransactionStatus::Completed => {
                return Err(ServiceError::Conflict(format!(
                    "transaction {id} is already completed"
                )));
            }
            TransactionStatus::Pending => {}
        }

        let removed = tx.delete_files_for_transaction(id).await?;
        tx.set_transaction_status(id, TransactionStatus::Failed, None)
            .await?;
        tx.commit().await?;

        record_settlement("failed");
        tracing::info!(
            transaction_id = id,
            folder_id = current.folder_id,
            files = removed.len(),
            "Stopped upload transaction"
        );

        self.drop_staged(id).await;
        self.discard_blobs(&removed).await;
        self.get(id).await
    }

    /// Move a transaction to the status named by `status`.
    ///
    /// `completed` settles and `failed` abandons, exactly like
    /// [`complete`](Self::complete) and [`stop`](Self::stop). A transaction
    /// that already reached a terminal status cannot move anywhere.
    pub async fn update_status(&self, id: i64, status: &str) -> ServiceResult<UploadTransactionRow> {
        let next: TransactionStatus = status.parse()?;
        let transaction = self.get(id).await?;
        let current = transaction.status()?;
        if !current.can_transition_to(next) {
            return Err(ServiceError::Conflict(format!(
                "transaction {id} is {current}, cannot move to {next}"
            )));
        }

        match next {
            TransactionStatus::Pending => Ok(transaction),
            TransactionStatus::Completed => self.complete(id).await,
            TransactionStatus::Failed => self.stop(id).await,
        }
    }

    /// The durable size of a folder plus the bytes staged by its open
    /// transactions.
    pub async fn staged_size(&self, folder_id: i64) -> ServiceResult<i64> {
        let folder = self
            .store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("folder {folder_id}")))?;

        let pending = self.store.list_pending_transactions(folder_id).await?;
        if pending.is_empty() {
            return Ok(folder.size);
        }
        let keys: Vec<String> = pending
            .iter()
            .map(|transaction| transaction_delta_key(transaction.id))
            .collect();
        let staged = match self.cache.multi_get(&keys).await {
            Ok(values) => values
                .iter()
                .map(|(_, delta)| (*delta).max(0))
                .fold(0i64, i64::saturating_add),
            Err(e) => {
                record_cache_failure("read");
                tracing::warn!(folder_id, error = %e, "Failed to read staged deltas");
                0
            }
        };
        Ok(folder.size.saturating_add(staged))
    }

    /// Drop the cached snapshots of deleted folders.
    pub async fn forget_folders(&self, folder_ids: &[i64]) {
        for folder_id in folder_ids {
            if let Err(e) = self.cache.remove(&snapshot_key(*folder_id)).await {
                record_cache_failure("evict");
                tracing::warn!(folder_id, error = %e, "Failed to evict size snapshot");
                break;
            }
        }
    }

    pub async fn get(&self, id: i64) -> ServiceResult<UploadTransactionRow> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {id}")))
    }

    /// Drop the settled delta and refresh the chain's snapshots.
    async fn refresh_after_settle(&self, id: i64, sizes: &[FolderSize]) {
        self.drop_staged(id).await;
        for entry in sizes {
            if let Err(e) = self.cache.set(&snapshot_key(entry.id), entry.size).await {
                record_cache_failure("seed");
                tracing::warn!(folder_id = entry.id, error = %e, "Failed to refresh size snapshot");
                break;
            }
        }
    }

    /// Remove a closed transaction's delta. A key left behind by a failure
    /// here expires with the cache TTL.
    async fn drop_staged(&self, id: i64) {
        if let Err(e) = self.cache.remove(&transaction_delta_key(id)).await {
            record_cache_failure("evict");
            tracing::warn!(transaction_id = id, error = %e, "Failed to drop staged delta");
        }
    }

    async fn discard_blobs(&self, files: &[FileRow]) {
        discard_blobs(self.blobs.as_ref(), files).await;
    }
}

/// Parallel blob deletions issued by one cleanup pass.
const BLOB_CLEANUP_CONCURRENCY: usize = 8;

/// Best-effort blob removal once the owning file row is gone.
pub(crate) async fn discard_blob(blobs: &dyn BlobStore, url: &str) {
    if let Err(e) = blobs.delete(url).await {
        crate::metrics::BLOB_CLEANUP_FAILURES.inc();
        tracing::warn!(url, error = %e, "Failed to delete blob");
    }
}

/// Best-effort removal of the blobs behind deleted file rows.
pub(crate) async fn discard_blobs(blobs: &dyn BlobStore, files: &[FileRow]) {
    futures::stream::iter(files)
        .for_each_concurrent(BLOB_CLEANUP_CONCURRENCY, |file| {
            discard_blob(blobs, &file.url)
        })
        .await;
}

async fn seed_chain(
    store: &dyn MetadataStore,
    cache: &dyn SizeCache,
    transaction_id: i64,
    folder_id: i64,
) {
    let chain = match store.parent_chain(folder_id).await {
        Ok(chain) => chain,
        Err(e) => {
            tracing::warn!(
                transaction_id,
                folder_id,
                error = %e,
                "Failed to read folder chain for cache seeding"
            );
            return;
        }
    };

    for folder in &chain {
        if let Err(e) = cache.set(&snapshot_key(folder.id), folder.size).await {
            record_cache_failure("seed");
            tracing::warn!(
                transaction_id,
                folder_id = folder.id,
                error = %e,
                "Failed to seed folder size into cache"
            );
            return;
        }
    }

    tracing::debug!(transaction_id, folders = chain.len(), "Seeded size cache");
}

fn ensure_pending(transaction: &UploadTransactionRow, action: &str) -> ServiceResult<()> {
    match transaction.status()? {
        TransactionStatus::Pending => Ok(()),
        status => Err(ServiceError::Conflict(format!(
            "cannot {action} transaction {}: already {status}",
            transaction.id
        ))),
    }
}

fn lookup(values: &[(String, i64)], key: &str) -> Option<i64> {
    values.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_treats_missing_as_absent() {
        let values = vec![("transaction_delta:3".to_string(), 12)];
        assert_eq!(lookup(&values, "transaction_delta:3"), Some(12));
        assert_eq!(lookup(&values, "folder_size:3"), None);
    }
}
