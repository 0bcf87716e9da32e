//! Shared handler helpers and response bodies.

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use canopy_core::format_size;
use canopy_metadata::models::{FileRow, FolderRow};
use serde::{Deserialize, Serialize};

/// Load a folder and check that the caller owns it.
pub async fn owned_folder(
    state: &AppState,
    user: AuthenticatedUser,
    folder_id: i64,
) -> ApiResult<FolderRow> {
    let folder = state.mutations.get_folder(folder_id).await?;
    if folder.owner_id != user.user_id {
        return Err(ApiError::Forbidden(format!(
            "no rights to use folder {folder_id}"
        )));
    }
    Ok(folder)
}

/// Load a file that must live directly in `folder_id`.
pub async fn file_in_folder(state: &AppState, folder_id: i64, file_id: i64) -> ApiResult<FileRow> {
    let file = state.mutations.get_file(file_id).await?;
    if file.folder_id != folder_id {
        return Err(ApiError::NotFound(format!(
            "file {file_id} in folder {folder_id}"
        )));
    }
    Ok(file)
}

/// Body naming a destination folder.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub new_folder_id: i64,
}

/// A folder with its size in bytes and in human-readable form.
#[derive(Debug, Serialize)]
pub struct FolderEntry {
    pub folder_id: i64,
    pub name: String,
    pub parent_folder_id: Option<i64>,
    pub size_bytes: i64,
    pub size: String,
}

impl From<&FolderRow> for FolderEntry {
    fn from(folder: &FolderRow) -> Self {
        Self {
            folder_id: folder.id,
            name: folder.name.clone(),
            parent_folder_id: folder.parent_id,
            size_bytes: folder.size,
            size: format_size(folder.size),
        }
    }
}

/// File metadata.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub file_id: i64,
    pub folder_id: i64,
    pub name: String,
    pub url: String,
    pub size_bytes: i64,
    pub size: String,
    pub transaction_id: Option<i64>,
}

impl From<&FileRow> for FileEntry {
    fn from(file: &FileRow) -> Self {
        Self {
            file_id: file.id,
            folder_id: file.folder_id,
            name: file.name.clone(),
            url: file.url.clone(),
            size_bytes: file.size,
            size: format_size(file.size),
            transaction_id: file.transaction_id,
        }
    }
}
