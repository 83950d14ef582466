//! Greenroom HTTP/WebSocket surface
//!
//! Thin axum layer over `greenroom-core`: JSON routes under `/api/v1`,
//! SSE streaming for chat, a WebSocket chat channel, and the operational
//! endpoints (`/health`, `/ready`, `/live`, `/metrics`).

pub mod http_error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    Router::new()
        // Conversation
        .route("/api/v1/conversation/chat", post(routes::conversation::chat))
        .route(
            "/api/v1/conversation/chat/stream",
            post(routes::conversation::chat_stream),
        )
        .route(
            "/api/v1/conversation/{id}",
            get(routes::conversation::get_conversation)
                .delete(routes::conversation::delete_conversation),
        )
        // Search + index management
        .route("/api/v1/search/talent/semantic", post(routes::search::semantic))
        .route("/api/v1/search/talent/similar/{id}", post(routes::search::similar))
        .route("/api/v1/search/index/talent", post(routes::search::index_talent))
        .route(
            "/api/v1/search/index/talent/{id}",
            delete(routes::search::delete_talent),
        )
        .route("/api/v1/search/index/reindex", post(routes::search::reindex))
        .route("/api/v1/search/index/stats", get(routes::search::stats))
        // AI utilities
        .route("/api/v1/ai/analyze/script", post(routes::ai::analyze_script))
        .route("/api/v1/ai/usage/report", get(routes::ai::usage_report))
        // WebSocket chat
        .route("/ws/chat/{conversation_id}", get(ws::chat_socket))
        // Operational endpoints live outside the versioned prefix
        .route("/health", get(routes::ops::health))
        .route("/ready", get(routes::ops::ready))
        .route("/live", get(routes::ops::live))
        .route("/metrics", get(routes::ops::metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
