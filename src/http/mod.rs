//! Axum HTTP surface (§6.1), thin routing over the `core` module.

mod edits;
mod error;
mod state;
mod workflows;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(edits::router())
        .merge(workflows::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
