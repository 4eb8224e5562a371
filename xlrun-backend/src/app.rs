use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, jobs, sessions};
use crate::state::AppState;

/// Room for multipart boundaries and headers on top of the payload limit.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Build the axum router with the provided shared application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health::health))
        .route("/upload", post(sessions::upload::upload))
        .route("/run", post(sessions::run::run))
        .route("/status/{jobId}", get(jobs::status::status))
        .route("/logs/{jobId}", get(jobs::logs::logs))
        .route("/results/{jobId}", get(jobs::results::results))
        .route("/download/{jobId}/{*filename}", get(jobs::download::download))
        .route("/jobs/{jobId}", delete(jobs::delete::delete))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
