//! Staging review endpoints.
//!
//! - `GET /v1/staging/commits` — list proposal commits
//! - `POST /v1/staging/commits/{id}/approve|reject`
//! - `GET /v1/conflicts`, `POST /v1/conflicts/{id}/resolve`

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use engram_domain::error::Error;
use engram_domain::staging::StashResolution;

use super::auth::request_context;
use super::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CommitsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn list_commits(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<CommitsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let commits = state.kernel.list_commits(
        &ctx,
        query.user_id.as_deref(),
        query.agent_id.as_deref(),
        query.status.as_deref(),
        query.limit,
    )?;
    let count = commits.len();
    Ok(Json(serde_json::json!({ "commits": commits, "count": count })))
}

pub async fn approve(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(commit_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let outcome = state.kernel.approve_commit(&ctx, &commit_id).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(Error::from)?))
}

pub async fn reject(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(commit_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let outcome = state.kernel.reject_commit(&ctx, &commit_id)?;
    Ok(Json(serde_json::to_value(outcome).map_err(Error::from)?))
}

#[derive(Deserialize)]
pub struct ConflictsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub async fn list_conflicts(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<ConflictsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let conflicts = state.kernel.list_conflicts(
        &ctx,
        query.user_id.as_deref(),
        query.resolution.as_deref(),
        query.limit,
    )?;
    let count = conflicts.len();
    Ok(Json(serde_json::json!({ "conflicts": conflicts, "count": count })))
}

#[derive(Deserialize)]
pub struct ResolveBody {
    pub resolution: String,
}

pub async fn resolve(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(stash_id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let resolution = StashResolution::parse(&body.resolution)
        .ok_or_else(|| Error::BadRequest(format!("unknown resolution {:?}", body.resolution)))?;
    let result = state
        .kernel
        .resolve_conflict(&ctx, &stash_id, resolution)
        .await?;
    Ok(Json(result))
}
