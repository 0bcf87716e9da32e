//! File endpoints.

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{FileEntry, MoveRequest, file_in_folder, owned_folder};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

/// Header attaching an upload to an open transaction.
pub const TRANSACTION_ID_HEADER: &str = "transaction_id";

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: String,
}

#[derive(Debug, Serialize)]
pub struct UploadFileResponse {
    pub file_id: i64,
    pub url: String,
    pub size: i64,
}

fn transaction_header(headers: &HeaderMap) -> ApiResult<Option<i64>> {
    let Some(value) = headers.get(TRANSACTION_ID_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid {TRANSACTION_ID_HEADER} header")))
}

/// POST /v1/folders/{folder_id}/files
///
/// The request body is the raw file content.
pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(folder_id): Path<i64>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadFileResponse>)> {
    owned_folder(&state, user, folder_id).await?;
    let transaction_id = transaction_header(&headers)?;

    let file = state
        .mutations
        .upload_file(folder_id, user.user_id, &query.file_name, body, transaction_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadFileResponse {
            file_id: file.id,
            url: file.url,
            size: file.size,
        }),
    ))
}

/// GET /v1/folders/{folder_id}/files/{file_id}
pub async fn get_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((folder_id, file_id)): Path<(i64, i64)>,
) -> ApiResult<Json<FileEntry>> {
    owned_folder(&state, user, folder_id).await?;
    let file = file_in_folder(&state, folder_id, file_id).await?;
    Ok(Json(FileEntry::from(&file)))
}

/// PUT /v1/folders/{folder_id}/files/{file_id}/move
pub async fn move_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((folder_id, file_id)): Path<(i64, i64)>,
    Json(body): Json<MoveRequest>,
) -> ApiResult<Json<FileEntry>> {
    owned_folder(&state, user, folder_id).await?;
    owned_folder(&state, user, body.new_folder_id).await?;
    file_in_folder(&state, folder_id, file_id).await?;

    let file = state
        .mutations
        .move_file(file_id, folder_id, body.new_folder_id)
        .await?;
    Ok(Json(FileEntry::from(&file)))
}

/// DELETE /v1/folders/{folder_id}/files/{file_id}
pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((folder_id, file_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    owned_folder(&state, user, folder_id).await?;
    file_in_folder(&state, folder_id, file_id).await?;

    state.mutations.delete_file(file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
