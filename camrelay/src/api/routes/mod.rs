//! API route modules.
//!
//! Organizes routes by resource type.

pub mod health;
pub mod streams;
pub mod video;

use axum::Router;

use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/video", video::router())
        .nest("/api/streams", streams::router())
        .nest("/health", health::router())
        .with_state(state)
}
