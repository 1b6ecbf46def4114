//! Route configuration and setup

use crate::handlers;
use crate::state::AppState;
use scribo_core::constants::API_PREFIX;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

// Upper bound on concurrently served requests.
const HTTP_CONCURRENCY_LIMIT: usize = 1_024;

// Multipart framing overhead on top of the raw file bytes.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Build the application router.
pub fn setup_routes(state: Arc<AppState>) -> Router {
    let body_limit = state
        .config
        .max_file_size_bytes()
        .saturating_mul(state.config.max_files_per_submission())
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/submissions", post(handlers::submissions::submit))
        .route("/submissions/cancel", post(handlers::submissions::cancel))
        .route("/submissions/reset", post(handlers::submissions::reset))
        .route(
            "/submissions/{id}/status",
            get(handlers::submissions::get_status),
        );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest(API_PREFIX, api_routes)
        .layer(ConcurrencyLimitLayer::new(HTTP_CONCURRENCY_LIMIT))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
