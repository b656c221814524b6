//! `/v1` router assembly.

pub mod auth;
pub mod digest;
pub mod error;
pub mod handoff;
pub mod memories;
pub mod namespaces;
pub mod scenes;
pub mod sessions;
pub mod sleep;
pub mod staging;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health & version
        .route("/health", get(health))
        .route("/v1/health", get(health))
        .route("/v1/version", get(version))
        // Sessions
        .route("/v1/sessions", post(sessions::create))
        // Memories
        .route("/v1/memories", post(memories::create).get(memories::list))
        .route("/v1/memories/search", post(memories::search))
        .route(
            "/v1/memories/:id",
            get(memories::get_one)
                .put(memories::update)
                .delete(memories::delete_one),
        )
        .route("/v1/memories/:id/history", get(memories::history))
        .route("/v1/memories/:id/promote", post(memories::promote))
        .route("/v1/memories/:id/demote", post(memories::demote))
        .route("/v1/search", post(memories::search))
        .route("/v1/decay", post(memories::decay))
        // Scenes
        .route("/v1/scenes", get(scenes::list))
        .route("/v1/scenes/search", post(scenes::search))
        .route("/v1/scenes/:id", get(scenes::get_one))
        // Staging
        .route("/v1/staging/commits", get(staging::list_commits))
        .route("/v1/staging/commits/:id/approve", post(staging::approve))
        .route("/v1/staging/commits/:id/reject", post(staging::reject))
        .route("/v1/conflicts", get(staging::list_conflicts))
        .route("/v1/conflicts/:id/resolve", post(staging::resolve))
        // Digest & trust
        .route("/v1/digest/daily", get(digest::daily))
        .route("/v1/trust", get(digest::trust))
        // Namespaces & agent policies
        .route(
            "/v1/namespaces",
            get(namespaces::list).post(namespaces::declare),
        )
        .route("/v1/namespaces/permissions", post(namespaces::grant))
        .route(
            "/v1/agent-policies",
            get(namespaces::list_policies)
                .post(namespaces::upsert_policy)
                .delete(namespaces::delete_policy),
        )
        // Sleep
        .route("/v1/sleep/run", post(sleep::run))
        // Handoff
        .route("/v1/handoff/resume", post(handoff::resume))
        .route("/v1/handoff/checkpoint", post(handoff::checkpoint))
        .route("/v1/handoff/lanes", get(handoff::lanes))
        .route("/v1/handoff/sessions/digest", post(handoff::session_digest))
        .route("/v1/handoff/sessions", get(handoff::sessions))
        .route("/v1/handoff/sessions/last", get(handoff::last_session))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "service": "engram" }))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": "v1",
        "pmk_version": "2.0",
    }))
}
