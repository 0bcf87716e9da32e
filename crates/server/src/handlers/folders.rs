//! Folder endpoints.

use crate::auth::AuthenticatedUser;
use crate::error::ApiResult;
use crate::handlers::{FileEntry, FolderEntry, MoveRequest, owned_folder};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Create folder request.
#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    /// Absent for a new root folder.
    #[serde(default)]
    pub parent_folder_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateFolderResponse {
    pub folder_id: i64,
}

/// The "du" view of one folder.
#[derive(Debug, Serialize)]
pub struct FolderListingResponse {
    pub folder: FolderEntry,
    pub children: Vec<FolderEntry>,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct DeleteFolderResponse {
    pub folder_id: i64,
    pub folders_deleted: usize,
    pub files_deleted: usize,
    pub size_bytes: i64,
}

/// POST /v1/folders
pub async fn create_folder(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateFolderRequest>,
) -> ApiResult<(StatusCode, Json<CreateFolderResponse>)> {
    if let Some(parent_id) = body.parent_folder_id {
        owned_folder(&state, user, parent_id).await?;
    }

    let folder = state
        .mutations
        .create_folder(user.user_id, &body.name, body.parent_folder_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateFolderResponse {
            folder_id: folder.id,
        }),
    ))
}

/// GET /v1/folders
pub async fn list_root_folders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<Vec<FolderEntry>>> {
    let folders = state.mutations.root_folders(user.user_id).await?;
    Ok(Json(folders.iter().map(FolderEntry::from).collect()))
}

/// GET /v1/folders/{folder_id}
pub async fn get_folder(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(folder_id): Path<i64>,
) -> ApiResult<Json<FolderListingResponse>> {
    owned_folder(&state, user, folder_id).await?;
    let listing = state.mutations.folder_listing(folder_id).await?;

    Ok(Json(FolderListingResponse {
        folder: FolderEntry::from(&listing.folder),
        children: listing.children.iter().map(FolderEntry::from).collect(),
        files: listing.files.iter().map(FileEntry::from).collect(),
    }))
}

/// PUT /v1/folders/{folder_id}/move
pub async fn move_folder(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(folder_id): Path<i64>,
    Json(body): Json<MoveRequest>,
) -> ApiResult<Json<FolderEntry>> {
    owned_folder(&state, user, folder_id).await?;
    owned_folder(&state, user, body.new_folder_id).await?;

    let folder = state
        .mutations
        .move_folder(folder_id, body.new_folder_id)
        .await?;
    Ok(Json(FolderEntry::from(&folder)))
}

/// DELETE /v1/folders/{folder_id}
pub async fn delete_folder(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(folder_id): Path<i64>,
) -> ApiResult<Json<DeleteFolderResponse>> {
    owned_folder(&state, user, folder_id).await?;
    let deletion = state.mutations.delete_folder(folder_id).await?;

    Ok(Json(DeleteFolderResponse {
        folder_id,
        folders_deleted: deletion.folder_ids.len(),
        files_deleted: deletion.files.len(),
        size_bytes: deletion.root.size,
    }))
}
