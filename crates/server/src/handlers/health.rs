//! Liveness endpoints.

use crate::error::{ApiError, ApiResult};
use crate::services::ServiceError;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: &'static str,
}

/// GET /v1/ping
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
///
/// Unauthenticated so load balancers and probes can reach it. Fails with
/// 503 when the metadata store, the size cache or the blob store is down.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state
        .metadata
        .health_check()
        .await
        .map_err(ServiceError::from)?;
    state
        .cache
        .health_check()
        .await
        .map_err(ServiceError::from)?;
    state
        .blobs
        .health_check()
        .await
        .map_err(|e| ApiError::from(ServiceError::StorageFailure(format!("blob store: {e}"))))?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}
