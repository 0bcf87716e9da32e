//! Upload transaction endpoints.

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::owned_folder;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use canopy_core::format_size;
use canopy_metadata::models::UploadTransactionRow;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StartTransactionResponse {
    pub transaction_id: i64,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: i64,
    pub folder_id: i64,
    pub status: String,
    /// Bytes applied to the folder tree at completion.
    pub total_size_bytes: i64,
}

impl From<UploadTransactionRow> for TransactionResponse {
    fn from(row: UploadTransactionRow) -> Self {
        Self {
            transaction_id: row.id,
            folder_id: row.folder_id,
            status: row.status,
            total_size_bytes: row.total_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionStatusResponse {
    #[serde(flatten)]
    pub transaction: TransactionResponse,
    /// Durable folder size plus anything still staged.
    pub staged_size_bytes: i64,
    pub staged_size: String,
}

/// Check that a transaction targets the folder in the path.
async fn folder_transaction(
    state: &AppState,
    folder_id: i64,
    transaction_id: i64,
) -> ApiResult<UploadTransactionRow> {
    let transaction = state.settlement.get(transaction_id).await?;
    if transaction.folder_id != folder_id {
        return Err(ApiError::NotFound(format!(
            "transaction {transaction_id} on folder {folder_id}"
        )));
    }
    Ok(transaction)
}

/// POST /v1/folders/{folder_id}/transaction/start
pub async fn start_transaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(folder_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<StartTransactionResponse>)> {
    owned_folder(&state, user, folder_id).await?;
    let started = state.settlement.start(user.user_id, folder_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(StartTransactionResponse {
            transaction_id: started.transaction.id,
        }),
    ))
}

/// GET /v1/folders/{folder_id}/transaction/{transaction_id}
pub async fn get_transaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((folder_id, transaction_id)): Path<(i64, i64)>,
) -> ApiResult<Json<TransactionStatusResponse>> {
    owned_folder(&state, user, folder_id).await?;
    let transaction = folder_transaction(&state, folder_id, transaction_id).await?;
    let staged = state.settlement.staged_size(folder_id).await?;

    Ok(Json(TransactionStatusResponse {
        transaction: transaction.into(),
        staged_size_bytes: staged,
        staged_size: format_size(staged),
    }))
}

/// PUT /v1/folders/{folder_id}/transaction/{transaction_id}/stop
pub async fn stop_transaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((folder_id, transaction_id)): Path<(i64, i64)>,
) -> ApiResult<Json<TransactionResponse>> {
    owned_folder(&state, user, folder_id).await?;
    folder_transaction(&state, folder_id, transaction_id).await?;

    let transaction = state.settlement.stop(transaction_id).await?;
    Ok(Json(transaction.into()))
}

/// PUT /v1/folders/{folder_id}/transaction/{transaction_id}/complete
pub async fn complete_transaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((folder_id, transaction_id)): Path<(i64, i64)>,
) -> ApiResult<Json<TransactionResponse>> {
    owned_folder(&state, user, folder_id).await?;
    folder_transaction(&state, folder_id, transaction_id).await?;

    let transaction = state.settlement.complete(transaction_id).await?;
    Ok(Json(transaction.into()))
}
