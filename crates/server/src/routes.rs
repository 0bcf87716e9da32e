//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Folders
        .route(
            "/v1/folders",
            post(handlers::create_folder).get(handlers::list_root_folders),
        )
        .route(
            "/v1/folders/{folder_id}",
            get(handlers::get_folder).delete(handlers::delete_folder),
        )
        .route("/v1/folders/{folder_id}/move", put(handlers::move_folder))
        // Files
        .route("/v1/folders/{folder_id}/files", post(handlers::upload_file))
        .route(
            "/v1/folders/{folder_id}/files/{file_id}",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route(
            "/v1/folders/{folder_id}/files/{file_id}/move",
            put(handlers::move_file),
        )
        // Upload transactions
        .route(
            "/v1/folders/{folder_id}/transaction/start",
            post(handlers::start_transaction),
        )
        .route(
            "/v1/folders/{folder_id}/transaction/{transaction_id}",
            get(handlers::get_transaction),
        )
        .route(
            "/v1/folders/{folder_id}/transaction/{transaction_id}/stop",
            put(handlers::stop_transaction),
        )
        .route(
            "/v1/folders/{folder_id}/transaction/{transaction_id}/complete",
            put(handlers::complete_transaction),
        )
        // Every route above needs a caller identity
        .route_layer(middleware::from_fn(auth_middleware))
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes));

    let mut router = Router::new()
        .route("/v1/ping", get(handlers::ping))
        .route("/health", get(handlers::health_check))
        .merge(api_routes);

    // Restrict /metrics at the network level when enabled.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
