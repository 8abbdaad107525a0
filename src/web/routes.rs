use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// REST API for programmatic access; the chat UI is a separate client.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Conversation turn
            .route("/ask", post(handlers::ask))
            // Anomaly monitoring
            .route("/alerts", get(handlers::alerts))
            // Dashboard figures
            .route("/stats", get(handlers::quick_stats))
            // LLM-facing schema context
            .route("/schema", get(handlers::schema))
            // System status
            .route("/status", get(handlers::status)),
    )
}
