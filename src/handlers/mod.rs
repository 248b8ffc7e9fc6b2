use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub mod chat;
pub mod health;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/chat", post(chat::chat))
}
