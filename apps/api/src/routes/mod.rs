pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::analysis::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/providers", get(handlers::handle_list_providers))
        // Analysis API
        .route("/api/v1/analysis", post(handlers::handle_run_analysis))
        .route(
            "/api/v1/analysis/stream",
            post(handlers::handle_stream_analysis),
        )
        .route(
            "/api/v1/analysis/:session_id",
            get(handlers::handle_get_session),
        )
        .route(
            "/api/v1/analysis/:session_id/report",
            get(handlers::handle_download_report),
        )
        .with_state(state)
}
