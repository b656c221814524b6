//! Handoff bus endpoints.
//!
//! - `POST /v1/handoff/resume` — select/create a lane and build a resume
//!   packet
//! - `POST /v1/handoff/checkpoint` — append-only checkpoint with
//!   optimistic concurrency
//! - `GET /v1/handoff/lanes`
//! - `POST /v1/handoff/sessions/digest` (legacy), `GET /v1/handoff/sessions`,
//!   `GET /v1/handoff/sessions/last`

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use engram_domain::error::Error;
use engram_kernel::handoff::{CheckpointArgs, ResumeArgs, SessionDigest};

use super::auth::request_context;
use super::error::ApiError;
use crate::state::AppState;

pub async fn resume(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<ResumeArgs>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    match state.kernel.handoff_resume(&ctx, &args).await? {
        Some(packet) => Ok(Json(serde_json::to_value(packet).map_err(Error::from)?)),
        None => Ok(Json(serde_json::json!({ "error": "No matching lane found" }))),
    }
}

pub async fn checkpoint(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(args): Json<CheckpointArgs>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let result = state.kernel.handoff_checkpoint(&ctx, &args).await?;
    Ok(Json(serde_json::to_value(result).map_err(Error::from)?))
}

#[derive(Deserialize)]
pub struct LanesQuery {
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub repo_path: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_user() -> String {
    "default".into()
}

fn default_limit() -> usize {
    20
}

pub async fn lanes(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<LanesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let statuses = query.status.as_ref().map(|s| vec![s.clone()]);
    let lanes = state.kernel.list_handoff_lanes(
        &ctx,
        &query.user_id,
        query.repo_path.as_deref(),
        statuses.as_deref(),
        query.limit,
    )?;
    let count = lanes.len();
    Ok(Json(serde_json::json!({ "lanes": lanes, "count": count })))
}

#[derive(Deserialize)]
pub struct DigestBody {
    pub user_id: String,
    pub agent_id: String,
    #[serde(flatten)]
    pub digest: SessionDigest,
}

pub async fn session_digest(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<DigestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let session = state
        .kernel
        .save_session_digest(&ctx, &body.user_id, &body.agent_id, &body.digest)
        .await?;
    Ok(Json(serde_json::to_value(session).map_err(Error::from)?))
}

#[derive(Deserialize)]
pub struct SessionsQuery {
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub async fn sessions(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let statuses = query.status.as_ref().map(|s| vec![s.clone()]);
    let sessions = state.kernel.list_handoff_sessions(
        &ctx,
        &query.user_id,
        query.agent_id.as_deref(),
        query.repo.as_deref(),
        statuses.as_deref(),
        query.limit,
    )?;
    let count = sessions.len();
    Ok(Json(serde_json::json!({ "sessions": sessions, "count": count })))
}

pub async fn last_session(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let statuses = query.status.as_ref().map(|s| vec![s.clone()]);
    match state.kernel.get_last_handoff_session(
        &ctx,
        &query.user_id,
        query.agent_id.as_deref(),
        query.repo.as_deref(),
        statuses.as_deref(),
    )? {
        Some(context) => Ok(Json(serde_json::to_value(context).map_err(Error::from)?)),
        None => Ok(Json(serde_json::json!({ "error": "No sessions found" }))),
    }
}
