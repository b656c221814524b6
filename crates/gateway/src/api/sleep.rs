//! Manual sleep-cycle trigger.
//!
//! - `POST /v1/sleep/run` — requires the `run_sleep_cycle` capability.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;

use engram_domain::error::Error;
use engram_kernel::sleep::SleepOptions;

use super::auth::request_context;
use super::error::ApiError;
use crate::state::AppState;

pub async fn run(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<SleepOptions>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let options = body.map(|Json(o)| o).unwrap_or_default();
    let report = state.kernel.run_sleep_cycle(&ctx, &options).await?;
    Ok(Json(serde_json::to_value(report).map_err(Error::from)?))
}
