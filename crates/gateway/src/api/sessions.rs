//! Session issuance.
//!
//! - `POST /v1/sessions` — mint a capability-scoped session token.
//!   Requires `X-Engram-Admin-Key` when `ENGRAM_ADMIN_KEY` is set.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;

use engram_kernel::SessionCreateRequest;

use super::auth::require_admin_key;
use super::error::ApiError;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    ConnectInfo(_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SessionCreateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin_key(&state, &headers)?;
    let created = state.kernel.create_session(&request)?;
    Ok(Json(serde_json::to_value(created).map_err(engram_domain::Error::from)?))
}
