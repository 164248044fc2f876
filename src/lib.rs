pub mod api;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod inference;
pub mod model;
pub mod ws;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use ws::AppState;

/// Full HTTP surface: UI page, JSON API, websocket, 404 fallback.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        // UI + JSON API
        .merge(api::router())
        // WebSocket question/answer events
        .merge(ws::ws_router())
        .fallback(api::not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

/// `RUST_LOG` wins; otherwise info for dependencies and debug for this crate.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,qwen_assistant=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
