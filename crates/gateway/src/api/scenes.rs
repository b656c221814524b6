//! Scene endpoints.
//!
//! - `GET /v1/scenes` — recent scenes
//! - `POST /v1/scenes/search` — semantic scene search
//! - `GET /v1/scenes/{id}`

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::auth::request_context;
use super::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let scenes = state
        .kernel
        .list_scenes(&ctx, query.user_id.as_deref(), query.limit)?;
    let count = scenes.len();
    Ok(Json(serde_json::json!({ "scenes": scenes, "count": count })))
}

#[derive(Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_user() -> String {
    "default".into()
}

fn default_search_limit() -> usize {
    10
}

pub async fn search(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<SearchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let hits = state
        .kernel
        .search_scenes(&ctx, &body.user_id, &body.query, body.limit)
        .await?;
    let count = hits.len();
    Ok(Json(serde_json::json!({ "scenes": hits, "count": count })))
}

pub async fn get_one(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(scene_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let scene = state.kernel.get_scene(&ctx, &scene_id)?;
    Ok(Json(serde_json::to_value(scene).map_err(engram_domain::Error::from)?))
}
