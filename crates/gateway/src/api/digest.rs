//! Digest and trust endpoints.
//!
//! - `GET /v1/digest/daily?user_id=&date=`
//! - `GET /v1/trust?user_id=&agent_id=`

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use engram_domain::error::Error;

use super::auth::request_context;
use super::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DigestQuery {
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub date: Option<String>,
}

fn default_user() -> String {
    "default".into()
}

pub async fn daily(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<DigestQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let date = query
        .date
        .unwrap_or_else(|| Utc::now().date_naive().to_string());
    let digest = state.kernel.get_daily_digest(&ctx, &query.user_id, &date)?;
    Ok(Json(serde_json::to_value(digest).map_err(Error::from)?))
}

#[derive(Deserialize)]
pub struct TrustQuery {
    #[serde(default = "default_user")]
    pub user_id: String,
    pub agent_id: String,
}

pub async fn trust(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<TrustQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let trust = state
        .kernel
        .get_agent_trust(&ctx, &query.user_id, &query.agent_id)?;
    Ok(Json(serde_json::to_value(trust).map_err(Error::from)?))
}
