pub mod config;
pub mod protocol;
pub mod registry;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::registry::Registry;
use crate::ws::websocket_handler;

async fn health_check() -> &'static str {
    "ok"
}

/// Build the relay router around an explicit registry instance.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .with_state(registry)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
