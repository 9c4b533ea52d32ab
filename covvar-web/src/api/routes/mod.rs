//! API route modules.

pub mod health;
pub mod prediction;

use axum::Router;
use axum::extract::DefaultBodyLimit;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .nest("/api", prediction::router())
        .nest("/health", health::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
