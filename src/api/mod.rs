use axum::{
    routing::{get, post},
    Router,
};

use crate::ws::AppState;

pub mod handlers;
pub mod types;

pub use handlers::not_found;
use handlers::{ask, index, settings};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/api/settings", get(settings))
        .route("/api/ask", post(ask))
}
