//! Route modules for the big upload server

pub mod health;
pub mod upload;

use axum::Router;

use crate::state::AppState;

/// Full application router, without middleware
pub fn app(state: AppState, max_chunk_bytes: usize) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/big-upload", upload::router(max_chunk_bytes))
        .with_state(state)
}
