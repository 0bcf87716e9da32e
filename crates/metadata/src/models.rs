//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use canopy_core::TransactionStatus;
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Folders
// =============================================================================

/// Folder record. `size` covers the folder's own files and every descendant.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FolderRow {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    /// Absent only for root folders.
    pub parent_id: Option<i64>,
    pub size: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FolderRow {
    pub fn size_entry(&self) -> FolderSize {
        FolderSize {
            id: self.id,
            size: self.size,
        }
    }
}

/// Input for creating a folder.
#[derive(Debug, Clone)]
pub struct NewFolder {
    pub owner_id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

/// Absolute size assignment for one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderSize {
    pub id: i64,
    pub size: i64,
}

// =============================================================================
// Files
// =============================================================================

/// File record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FileRow {
    pub id: i64,
    pub folder_id: i64,
    pub owner_id: i64,
    pub name: String,
    /// Opaque blob store URL.
    pub url: String,
    pub size: i64,
    /// Set when the file was uploaded under a batch transaction.
    pub transaction_id: Option<i64>,
    pub created_at: OffsetDateTime,
}

/// Input for inserting a file.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub folder_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub url: String,
    pub size: i64,
    pub transaction_id: Option<i64>,
}

// =============================================================================
// Upload transactions
// =============================================================================

/// Upload transaction record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UploadTransactionRow {
    pub id: i64,
    pub owner_id: i64,
    pub folder_id: i64,
    pub status: String,
    /// Bytes applied to the folder tree when the transaction completed.
    pub total_size: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UploadTransactionRow {
    pub fn status(&self) -> MetadataResult<TransactionStatus> {
        Ok(self.status.parse()?)
    }
}
