//! HTTP surface (v1).

pub mod admin;
pub mod exports;
pub mod imports;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// JSON error envelope used by every handler.
pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Build the service router: the v1 API, health/metrics, and static
/// serving of the export directory under /downloads.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/v1/imports",
            axum::routing::post(imports::create_import),
        )
        .route("/v1/imports/:job_id", get(imports::get_import))
        .route(
            "/v1/exports",
            get(exports::stream_export_handler).post(exports::create_export),
        )
        .route("/v1/exports/:job_id", get(exports::get_export))
        .route("/v1/admin/stats", get(admin::stats))
        .route("/health", get(admin::health))
        .route("/metrics", get(admin::metrics))
        .nest_service("/downloads", ServeDir::new(&state.config.exports_dir))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
