//! Memory endpoints.
//!
//! - `POST /v1/memories` — staged or trusted-direct write (`mode`,
//!   `infer`, `source_event_id`)
//! - `GET /v1/memories` / `GET|PUT|DELETE /v1/memories/{id}`
//! - `POST /v1/memories/search` (alias `/v1/search`)
//! - `GET /v1/memories/{id}/history`, `POST .../promote|demote`
//! - `POST /v1/decay` — manual decay tick

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use engram_domain::memory::MemoryLayer;
use engram_kernel::staging::{WriteMode, WriteRequest};
use engram_kernel::UpdateMemoryRequest;
use engram_store::MemoryQuery;

use super::auth::{is_loopback, request_context};
use super::error::ApiError;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(mut request): Json<WriteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    // Direct mode is honored only for trusted local callers.
    request.trusted_direct = request.mode == WriteMode::Direct && is_loopback(&addr);
    let response = state.kernel.propose_write(&ctx, &request).await?;
    Ok(Json(serde_json::to_value(response).map_err(engram_domain::Error::from)?))
}

#[derive(Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

fn default_user() -> String {
    "default".into()
}

fn default_limit() -> usize {
    10
}

pub async fn search(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<SearchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let response = state
        .kernel
        .search(
            &ctx,
            &body.query,
            &body.user_id,
            body.limit,
            body.categories.as_deref(),
        )
        .await?;
    Ok(Json(serde_json::to_value(response).map_err(engram_domain::Error::from)?))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    100
}

pub async fn list(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let memories = state.kernel.list_memories(
        &ctx,
        &MemoryQuery {
            user_id: query.user_id,
            namespace: query.namespace,
            limit: Some(query.limit),
            ..Default::default()
        },
    )?;
    let count = memories.len();
    Ok(Json(serde_json::json!({
        "memories": memories,
        "count": count,
    })))
}

pub async fn get_one(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(memory_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let memory = state.kernel.get_memory(&ctx, &memory_id)?;
    Ok(Json(serde_json::to_value(memory).map_err(engram_domain::Error::from)?))
}

pub async fn update(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(memory_id): Path<String>,
    Json(request): Json<UpdateMemoryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let memory = state.kernel.update_memory(&ctx, &memory_id, &request).await?;
    Ok(Json(serde_json::to_value(memory).map_err(engram_domain::Error::from)?))
}

pub async fn delete_one(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(memory_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let deleted = state.kernel.delete_memory(&ctx, &memory_id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted, "id": memory_id })))
}

pub async fn history(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(memory_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let events = state.kernel.get_memory_history(&ctx, &memory_id)?;
    Ok(Json(serde_json::json!({ "history": events })))
}

pub async fn promote(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(memory_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let memory = state
        .kernel
        .set_memory_layer(&ctx, &memory_id, MemoryLayer::Lml)?;
    Ok(Json(serde_json::to_value(memory).map_err(engram_domain::Error::from)?))
}

pub async fn demote(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(memory_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let memory = state
        .kernel
        .set_memory_layer(&ctx, &memory_id, MemoryLayer::Sml)?;
    Ok(Json(serde_json::to_value(memory).map_err(engram_domain::Error::from)?))
}

#[derive(Deserialize, Default)]
pub struct DecayBody {
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn decay(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<DecayBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let report = state.kernel.apply_decay(&ctx, body.user_id.as_deref()).await?;
    Ok(Json(serde_json::to_value(report).map_err(engram_domain::Error::from)?))
}
