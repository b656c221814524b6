//! Namespace and agent-policy endpoints.
//!
//! - `GET|POST /v1/namespaces`
//! - `POST /v1/namespaces/permissions`
//! - `GET|POST|DELETE /v1/agent-policies`

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use engram_domain::capability::Capability;
use engram_domain::error::Error;
use engram_domain::memory::ConfidentialityScope;
use engram_domain::session::AgentPolicy;

use super::auth::request_context;
use super::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let namespaces = state.kernel.list_namespaces(&ctx, query.user_id.as_deref())?;
    let count = namespaces.len();
    Ok(Json(serde_json::json!({ "namespaces": namespaces, "count": count })))
}

#[derive(Deserialize)]
pub struct DeclareBody {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn declare(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<DeclareBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let namespace_id = state.kernel.declare_namespace(
        &ctx,
        &body.user_id,
        &body.name,
        body.description.as_deref(),
    )?;
    Ok(Json(serde_json::json!({ "id": namespace_id, "name": body.name })))
}

#[derive(Deserialize)]
pub struct GrantBody {
    pub user_id: String,
    pub namespace: String,
    pub agent_id: String,
    pub capability: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn grant(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<GrantBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let permission = state.kernel.grant_namespace_permission(
        &ctx,
        &body.user_id,
        &body.namespace,
        &body.agent_id,
        &body.capability,
        body.expires_at,
    )?;
    Ok(Json(serde_json::to_value(permission).map_err(Error::from)?))
}

#[derive(Deserialize)]
pub struct PolicyBody {
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub allowed_confidentiality_scopes: Vec<String>,
    #[serde(default)]
    pub allowed_capabilities: Vec<String>,
    #[serde(default)]
    pub allowed_namespaces: Vec<String>,
}

pub async fn upsert_policy(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<PolicyBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let now = Utc::now();
    let policy = AgentPolicy {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: body.user_id.clone(),
        agent_id: body.agent_id.clone(),
        allowed_confidentiality_scopes: body
            .allowed_confidentiality_scopes
            .iter()
            .map(|s| ConfidentialityScope::parse_lenient(s))
            .collect(),
        allowed_capabilities: body
            .allowed_capabilities
            .iter()
            .filter_map(|c| Capability::parse(c))
            .collect(),
        allowed_namespaces: body.allowed_namespaces.clone(),
        created_at: now,
        updated_at: now,
    };
    state.kernel.upsert_agent_policy(&ctx, &policy)?;
    Ok(Json(serde_json::to_value(policy).map_err(Error::from)?))
}

pub async fn list_policies(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let policies = state
        .kernel
        .list_agent_policies(&ctx, query.user_id.as_deref())?;
    let count = policies.len();
    Ok(Json(serde_json::json!({ "policies": policies, "count": count })))
}

#[derive(Deserialize)]
pub struct DeletePolicyQuery {
    pub user_id: String,
    pub agent_id: String,
}

pub async fn delete_policy(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<DeletePolicyQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = request_context(&state, &headers, &addr)?;
    let deleted = state
        .kernel
        .delete_agent_policy(&ctx, &query.user_id, &query.agent_id)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
