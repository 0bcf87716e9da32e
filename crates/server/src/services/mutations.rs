//! Synchronous file and folder mutations.
//!
//! Each mutation opens exactly one unit of work on the metadata store, makes
//! its row change, and runs the size propagation for it before committing.
//! Blob cleanup happens only after the commit and never fails the request.
//!
//! Row locks are always taken transaction first, then folders from leaf to
//! root, the same order settlement uses.

use crate::metrics::{BYTES_UPLOADED, observe_propagation, record_mutation};
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::settlement::{SettlementEngine, discard_blob, discard_blobs};
use bytes::Bytes;
use canopy_core::TransactionStatus;
use canopy_metadata::models::{FileRow, FolderRow, NewFile, NewFolder, UploadTransactionRow};
use canopy_metadata::tree::{self, SubtreeDeletion};
use canopy_metadata::{MetadataStore, TreeTransaction};
use canopy_storage::BlobStore;
use std::sync::Arc;
use tracing::instrument;

/// A folder together with its direct children and files.
#[derive(Debug, Clone)]
pub struct FolderListing {
    pub folder: FolderRow,
    pub children: Vec<FolderRow>,
    pub files: Vec<FileRow>,
}

/// Applies file and folder changes with immediate size propagation.
pub struct MutationService {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    settlement: Arc<SettlementEngine>,
}

impl MutationService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        settlement: Arc<SettlementEngine>,
    ) -> Self {
        Self {
            store,
            blobs,
            settlement,
        }
    }

    /// Store `data` as a new file in `folder_id`.
    ///
    /// Without a transaction the folder and all its ancestors grow in the
    /// same unit of work as the insert. With one, the size is staged for
    /// settlement instead. The blob is removed again if the row cannot be
    /// written.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_file(
        &self,
        folder_id: i64,
        owner_id: i64,
        name: &str,
        data: Bytes,
        transaction_id: Option<i64>,
    ) -> ServiceResult<FileRow> {
        validate_name(name)?;
        let size = i64::try_from(data.len())
            .map_err(|_| ServiceError::InvalidArgument("file too large".to_string()))?;

        self.store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("folder {folder_id}")))?;
        if let Some(id) = transaction_id {
            let transaction = self
                .store
                .get_transaction(id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("transaction {id}")))?;
            check_upload_target(&transaction, folder_id)?;
        }

        let url = self.blobs.upload(data, name).await?;
        match self
            .upload_file_row(folder_id, owner_id, name, &url, size, transaction_id)
            .await
        {
            Ok(file) => {
                BYTES_UPLOADED.inc_by(file.size.unsigned_abs());
                Ok(file)
            }
            Err(e) => {
                discard_blob(self.blobs.as_ref(), &url).await;
                Err(e)
            }
        }
    }

    /// Record a file whose content already lives at `url`.
    ///
    /// Under a transaction the bytes are staged before the commit releases
    /// the transaction row.
    pub async fn upload_file_row(
        &self,
        folder_id: i64,
        owner_id: i64,
        name: &str,
        url: &str,
        size: i64,
        transaction_id: Option<i64>,
    ) -> ServiceResult<FileRow> {
        validate_name(name)?;
        let size = canopy_core::non_negative(size)?;

        let mut tx = self.store.begin().await?;
        if let Some(id) = transaction_id {
            let transaction = tx
                .get_transaction(id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("transaction {id}")))?;
            check_upload_target(&transaction, folder_id)?;
        }
        require_folder(tx.as_mut(), folder_id).await?;

        let file = tx
            .insert_file(&NewFile {
                folder_id,
                owner_id,
                name: name.to_string(),
                url: url.to_string(),
                size,
                transaction_id,
            })
            .await?;

        match transaction_id {
            Some(id) => self.settlement.record_upload(id, folder_id, size).await,
            None => {
                let depth = tree::increase_size(tx.as_mut(), folder_id, size).await?;
                observe_propagation(depth);
            }
        }
        tx.commit().await?;

        record_mutation(if transaction_id.is_some() {
            "staged_upload"
        } else {
            "upload_file"
        });
        tracing::debug!(file_id = file.id, folder_id, size, "Stored file");
        Ok(file)
    }

    /// Remove a file and take its size out of the folder chain.
    ///
    /// A file still waiting for its transaction to settle was never counted
    /// in the folder sizes; its staged delta is withdrawn instead.
    #[instrument(skip(self))]
    pub async fn delete_file(&self, file_id: i64) -> ServiceResult<FileRow> {
        let staged_under = self.get_file(file_id).await?.transaction_id;
        let mut tx = self.store.begin().await?;
        let staged_in = pending_transaction(tx.as_mut(), staged_under).await?;
        let file = require_file(tx.as_mut(), file_id).await?;

        tx.delete_file_row(file_id).await?;
        match staged_in {
            Some(transaction_id) => {
                self.settlement
                    .withdraw_upload(transaction_id, file.folder_id, file.size)
                    .await;
            }
            None => {
                let depth = tree::decrease_size(tx.as_mut(), file.folder_id, file.size).await?;
                observe_propagation(depth);
            }
        }
        tx.commit().await?;

        discard_blob(self.blobs.as_ref(), &file.url).await;
        record_mutation("delete_file");
        Ok(file)
    }

    /// Move a file between folders, shifting its size from one chain to the
    /// other. `current_folder_id` must be where the file actually lives.
    #[instrument(skip(self))]
    pub async fn move_file(
        &self,
        file_id: i64,
        current_folder_id: i64,
        new_folder_id: i64,
    ) -> ServiceResult<FileRow> {
        let staged_under = self.get_file(file_id).await?.transaction_id;
        let mut tx = self.store.begin().await?;
        if let Some(transaction_id) = pending_transaction(tx.as_mut(), staged_under).await? {
            return Err(ServiceError::Conflict(format!(
                "file {file_id} belongs to pending transaction {transaction_id}"
            )));
        }
        let mut file = require_file(tx.as_mut(), file_id).await?;
        if file.folder_id != current_folder_id {
            return Err(ServiceError::InvalidArgument(format!(
                "file {file_id} is in folder {}, not {current_folder_id}",
                file.folder_id
            )));
        }
        require_folder(tx.as_mut(), new_folder_id).await?;

        tx.set_file_folder(file_id, new_folder_id).await?;
        let out = tree::decrease_size(tx.as_mut(), current_folder_id, file.size).await?;
        let into = tree::increase_size(tx.as_mut(), new_folder_id, file.size).await?;
        tx.commit().await?;

        observe_propagation(out);
        observe_propagation(into);
        record_mutation("move_file");
        file.folder_id = new_folder_id;
        Ok(file)
    }

    /// Create an empty folder. Ancestors are untouched since it adds no bytes.
    pub async fn create_folder(
        &self,
        owner_id: i64,
        name: &str,
        parent_id: Option<i64>,
    ) -> ServiceResult<FolderRow> {
        validate_name(name)?;
        let folder = self
            .store
            .create_folder(&NewFolder {
                owner_id,
                name: name.to_string(),
                parent_id,
            })
            .await?;
        record_mutation("create_folder");
        tracing::debug!(folder_id = folder.id, ?parent_id, "Created folder");
        Ok(folder)
    }

    /// Re-parent a folder and move its size from the old chain to the new one.
    #[instrument(skip(self))]
    pub async fn move_folder(&self, folder_id: i64, new_parent_id: i64) -> ServiceResult<FolderRow> {
        let mut tx = self.store.begin().await?;
        let mut folder = tree::move_folder(tx.as_mut(), folder_id, new_parent_id).await?;

        if let Some(old_parent_id) = folder.parent_id {
            let depth = tree::decrease_size(tx.as_mut(), old_parent_id, folder.size).await?;
            observe_propagation(depth);
        }
        let depth = tree::increase_size(tx.as_mut(), new_parent_id, folder.size).await?;
        observe_propagation(depth);
        tx.commit().await?;

        record_mutation("move_folder");
        tracing::info!(
            folder_id,
            old_parent_id = ?folder.parent_id,
            new_parent_id,
            size = folder.size,
            "Moved folder"
        );
        folder.parent_id = Some(new_parent_id);
        Ok(folder)
    }

    /// Delete a folder with everything below it and shrink the former
    /// ancestors by its size.
    #[instrument(skip(self))]
    pub async fn delete_folder(&self, folder_id: i64) -> ServiceResult<SubtreeDeletion> {
        let mut tx = self.store.begin().await?;
        let deletion = tree::delete_subtree(tx.as_mut(), folder_id).await?;
        if let Some(parent_id) = deletion.root.parent_id {
            let depth = tree::decrease_size(tx.as_mut(), parent_id, deletion.root.size).await?;
            observe_propagation(depth);
        }
        tx.commit().await?;

        self.settlement.forget_folders(&deletion.folder_ids).await;
        discard_blobs(self.blobs.as_ref(), &deletion.files).await;
        record_mutation("delete_folder");
        tracing::info!(
            folder_id,
            folders = deletion.folder_ids.len(),
            files = deletion.files.len(),
            size = deletion.root.size,
            "Deleted folder"
        );
        Ok(deletion)
    }

    /// The "du" view of a folder.
    pub async fn folder_listing(&self, folder_id: i64) -> ServiceResult<FolderListing> {
        let folder = self.get_folder(folder_id).await?;
        let children = self.store.list_children(folder_id).await?;
        let files = self.store.list_files(folder_id).await?;
        Ok(FolderListing {
            folder,
            children,
            files,
        })
    }

    pub async fn root_folders(&self, owner_id: i64) -> ServiceResult<Vec<FolderRow>> {
        Ok(self.store.list_root_folders(owner_id).await?)
    }

    pub async fn get_folder(&self, folder_id: i64) -> ServiceResult<FolderRow> {
        self.store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("folder {folder_id}")))
    }

    pub async fn get_file(&self, file_id: i64) -> ServiceResult<FileRow> {
        self.store
            .get_file(file_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("file {file_id}")))
    }
}

fn validate_name(name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(
            "name must not be empty".to_string(),
        ));
    }
    Ok(())
}

async fn require_folder(tx: &mut dyn TreeTransaction, folder_id: i64) -> ServiceResult<FolderRow> {
    tx.get_folder(folder_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("folder {folder_id}")))
}

async fn require_file(tx: &mut dyn TreeTransaction, file_id: i64) -> ServiceResult<FileRow> {
    tx.get_file(file_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("file {file_id}")))
}

/// An upload under a transaction must target the transaction's own folder
/// while it is still open.
fn check_upload_target(transaction: &UploadTransactionRow, folder_id: i64) -> ServiceResult<()> {
    let status = transaction.status()?;
    if status != TransactionStatus::Pending {
        return Err(ServiceError::Conflict(format!(
            "transaction {} is already {status}",
            transaction.id
        )));
    }
    if transaction.folder_id != folder_id {
        return Err(ServiceError::InvalidArgument(format!(
            "transaction {} targets folder {}, not {folder_id}",
            transaction.id, transaction.folder_id
        )));
    }
    Ok(())
}

/// The id of the transaction a file was uploaded under, if it is still
/// pending. A file never changes transaction, so callers read the id before
/// opening the unit of work and lock the transaction ahead of the file row.
async fn pending_transaction(
    tx: &mut dyn TreeTransaction,
    staged_under: Option<i64>,
) -> ServiceResult<Option<i64>> {
    let Some(transaction_id) = staged_under else {
        return Ok(None);
    };
    match tx.get_transaction(transaction_id).await? {
        Some(transaction) if transaction.status()? == TransactionStatus::Pending => {
            Ok(Some(transaction_id))
        }
        _ => Ok(None),
    }
}
