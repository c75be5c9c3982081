pub mod common;
pub mod conversations;
pub mod duplex;
pub mod health;
pub mod upload;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::AppState;

/// Assembles the full HTTP/duplex surface (§6) over a single `AppState`,
/// nesting every route group under one top-level router rather than
/// running several listeners.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/v1/listen", get(duplex::listen_handler))
        .route("/audio/upload", post(upload::upload_handler))
        .route("/audio/get_audio/{conversation_id}", get(conversations::get_audio))
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation).delete(conversations::delete_conversation),
        )
        .route(
            "/conversations/{conversation_id}/reprocess/transcript",
            post(conversations::reprocess_transcript),
        )
        .route(
            "/conversations/{conversation_id}/reprocess/memory",
            post(conversations::reprocess_memory),
        )
        .route(
            "/conversations/{conversation_id}/activate/transcript/{version_id}",
            post(conversations::activate_transcript),
        )
        .route(
            "/conversations/{conversation_id}/activate/memory/{version_id}",
            post(conversations::activate_memory),
        )
        .route("/conversations/{conversation_id}/versions", get(conversations::get_versions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
