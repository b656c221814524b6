//! Session issuance and per-request enforcement.
//!
//! Issuance computes `desired ∩ clamp(agent_policy)` — policies never
//! grant, they clamp. The raw token is minted fresh, returned once, and
//! only its SHA-256 hash is persisted.

use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use engram_domain::capability::Capability;
use engram_domain::config::Config;
use engram_domain::error::{Error, Result};
use engram_domain::memory::ConfidentialityScope;
use engram_domain::session::{AgentPolicy, SessionRecord};
use engram_store::Store;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreateRequest {
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// `None` requests unrestricted scopes (local user only).
    #[serde(default)]
    pub allowed_confidentiality_scopes: Option<Vec<String>>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub namespaces: Option<Vec<String>>,
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
    /// The bearer token. Shown exactly once; only the hash is stored.
    pub token: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub allowed_confidentiality_scopes: Option<Vec<ConfidentialityScope>>,
    pub capabilities: Vec<Capability>,
    pub namespaces: Vec<String>,
    pub expires_at: chrono::DateTime<Utc>,
}

/// What a request is allowed to do, resolved once at the top of each
/// operation. `session == None` means a trusted local caller (or the
/// gateway is disabled) — unrestricted.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session: Option<SessionRecord>,
    pub trusted_local: bool,
}

impl RequestContext {
    pub fn unrestricted() -> RequestContext {
        RequestContext {
            session: None,
            trusted_local: true,
        }
    }

    pub fn require_capability(&self, cap: Capability) -> Result<()> {
        match &self.session {
            None => Ok(()),
            Some(session) if session.has_capability(cap) => Ok(()),
            Some(_) => Err(Error::CapabilityDenied(cap.as_str().to_string())),
        }
    }

    /// `None` = unrestricted.
    pub fn allowed_scopes(&self) -> Option<Vec<ConfidentialityScope>> {
        self.session
            .as_ref()
            .and_then(|s| s.allowed_confidentiality_scopes.clone())
    }

    /// `None` = unrestricted.
    pub fn allowed_namespaces(&self) -> Option<Vec<String>> {
        match &self.session {
            None => None,
            Some(session) if session.namespace_unrestricted() => None,
            Some(session) => Some(session.namespaces.clone()),
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.agent_id.as_deref())
    }
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("egm_{}", hex::encode(bytes))
}

fn parse_scopes(raw: &[String]) -> Vec<ConfidentialityScope> {
    let mut out = Vec::new();
    for value in raw {
        let scope = ConfidentialityScope::parse_lenient(value);
        if !out.contains(&scope) {
            out.push(scope);
        }
    }
    out
}

fn parse_capabilities(raw: &[String]) -> Vec<Capability> {
    let mut out = Vec::new();
    for value in raw {
        if let Some(cap) = Capability::parse(value) {
            if !out.contains(&cap) {
                out.push(cap);
            }
        }
    }
    out
}

fn clamp<T: PartialEq + Clone>(desired: &[T], allowed: &[T]) -> Vec<T> {
    desired
        .iter()
        .filter(|item| allowed.contains(item))
        .cloned()
        .collect()
}

/// Issue a session, clamping to the agent policy when one exists.
pub fn create_session(
    store: &Store,
    config: &Config,
    request: &SessionCreateRequest,
) -> Result<SessionCreated> {
    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return Err(Error::BadRequest("user_id is required".into()));
    }
    let agent_id = request
        .agent_id
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());

    let desired_scopes = request
        .allowed_confidentiality_scopes
        .as_ref()
        .map(|raw| parse_scopes(raw));
    let mut capabilities = request
        .capabilities
        .as_ref()
        .map(|raw| parse_capabilities(raw))
        .unwrap_or_else(Capability::default_set);
    let mut namespaces = request
        .namespaces
        .clone()
        .unwrap_or_else(|| vec!["*".to_string()]);
    let mut scopes = desired_scopes;

    if let Some(agent_id) = agent_id {
        let policy: Option<AgentPolicy> =
            store.get_agent_policy(user_id, agent_id, true).map_err(Error::from)?;
        match policy {
            Some(policy) => {
                let desired = scopes.unwrap_or_else(ConfidentialityScope::all);
                scopes = Some(clamp(&desired, &policy.allowed_confidentiality_scopes));
                capabilities = clamp(&capabilities, &policy.allowed_capabilities);
                if !policy.allowed_namespaces.iter().any(|n| n == "*") {
                    if namespaces.iter().any(|n| n == "*") {
                        namespaces = policy.allowed_namespaces.clone();
                    } else {
                        namespaces = namespaces
                            .into_iter()
                            .filter(|n| policy.allowed_namespaces.contains(n))
                            .collect();
                    }
                }
            }
            None => {
                if config.policy.require_agent_policy {
                    return Err(Error::NoPolicyConfigured(agent_id.to_string()));
                }
                let wants_handoff = capabilities
                    .iter()
                    .any(|c| Capability::handoff_set().contains(c));
                if wants_handoff && !config.handoff.allow_auto_trusted_bootstrap {
                    return Err(Error::NoPolicyConfigured(format!(
                        "{agent_id} (handoff capabilities require an explicit policy)"
                    )));
                }
                // Agent sessions never get unrestricted scopes implicitly.
                if scopes.is_none() {
                    scopes = Some(ConfidentialityScope::all());
                }
            }
        }
    }

    let ttl = request
        .ttl_minutes
        .filter(|m| *m > 0)
        .unwrap_or(config.policy.default_session_ttl_minutes);
    let now = Utc::now();
    let token = mint_token();
    let session = SessionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        token_hash: hash_token(&token),
        user_id: user_id.to_string(),
        agent_id: agent_id.map(String::from),
        allowed_confidentiality_scopes: scopes.clone(),
        capabilities: capabilities.clone(),
        namespaces: namespaces.clone(),
        expires_at: now + Duration::minutes(ttl),
        created_at: now,
        revoked_at: None,
    };
    store.create_session(&session).map_err(Error::from)?;

    tracing::info!(
        user_id,
        agent_id = agent_id.unwrap_or("-"),
        capabilities = capabilities.len(),
        ttl_minutes = ttl,
        "session issued"
    );

    Ok(SessionCreated {
        session_id: session.id,
        token,
        user_id: session.user_id,
        agent_id: session.agent_id,
        allowed_confidentiality_scopes: scopes,
        capabilities,
        namespaces,
        expires_at: session.expires_at,
    })
}

/// Resolve a bearer token (or the trusted-local bypass) into a
/// [`RequestContext`].
pub fn authenticate(
    store: &Store,
    config: &Config,
    token: Option<&str>,
    trusted_local: bool,
) -> Result<RequestContext> {
    if !config.policy.gateway_enabled {
        return Ok(RequestContext::unrestricted());
    }
    match token.filter(|t| !t.trim().is_empty()) {
        Some(token) => {
            let session = store
                .get_session_by_token_hash(&hash_token(token))
                .map_err(Error::from)?
                .ok_or(Error::InvalidToken)?;
            if session.is_revoked() {
                return Err(Error::InvalidToken);
            }
            if session.is_expired(Utc::now()) {
                return Err(Error::SessionExpired);
            }
            Ok(RequestContext {
                session: Some(session),
                trusted_local,
            })
        }
        None => {
            if trusted_local && config.policy.trusted_local_bypass {
                Ok(RequestContext::unrestricted())
            } else {
                Err(Error::Unauthorized("session token required".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_and_config() -> (Store, Config) {
        (Store::open_in_memory().unwrap(), Config::default())
    }

    fn request(agent: Option<&str>) -> SessionCreateRequest {
        SessionCreateRequest {
            user_id: "u1".into(),
            agent_id: agent.map(String::from),
            allowed_confidentiality_scopes: Some(vec!["work".into(), "finance".into()]),
            capabilities: Some(vec!["search".into(), "propose_write".into()]),
            namespaces: Some(vec!["default".into()]),
            ttl_minutes: Some(30),
        }
    }

    fn policy(user: &str, agent: &str, caps: Vec<Capability>) -> AgentPolicy {
        let now = Utc::now();
        AgentPolicy {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.into(),
            agent_id: agent.into(),
            allowed_confidentiality_scopes: vec![ConfidentialityScope::Work],
            allowed_capabilities: caps,
            allowed_namespaces: vec!["default".into()],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn issued_sets_are_clamped_to_policy() {
        let (store, config) = store_and_config();
        store
            .upsert_agent_policy(&policy("u1", "agent-a", vec![Capability::Search]))
            .unwrap();

        let created = create_session(&store, &config, &request(Some("agent-a"))).unwrap();
        // finance was requested but the policy only allows work.
        assert_eq!(
            created.allowed_confidentiality_scopes,
            Some(vec![ConfidentialityScope::Work])
        );
        // propose_write was requested but the policy only allows search.
        assert_eq!(created.capabilities, vec![Capability::Search]);
        assert!(created.token.starts_with("egm_"));
    }

    #[test]
    fn strict_mode_denies_policyless_agents() {
        let (store, mut config) = store_and_config();
        config.policy.require_agent_policy = true;
        let err = create_session(&store, &config, &request(Some("ghost"))).unwrap_err();
        assert!(matches!(err, Error::NoPolicyConfigured(_)));
        // Local-user sessions (no agent) are unaffected.
        create_session(&store, &config, &request(None)).unwrap();
    }

    #[test]
    fn handoff_capabilities_require_policy() {
        let (store, config) = store_and_config();
        let mut req = request(Some("agent-b"));
        req.capabilities = Some(vec!["write_handoff".into()]);
        let err = create_session(&store, &config, &req).unwrap_err();
        assert!(matches!(err, Error::NoPolicyConfigured(_)));

        let mut config = config;
        config.handoff.allow_auto_trusted_bootstrap = true;
        create_session(&store, &config, &req).unwrap();
    }

    #[test]
    fn token_round_trips_through_authenticate() {
        let (store, config) = store_and_config();
        let created = create_session(&store, &config, &request(None)).unwrap();

        let ctx = authenticate(&store, &config, Some(&created.token), false).unwrap();
        assert!(ctx.session.is_some());
        ctx.require_capability(Capability::Search).unwrap();
        assert!(ctx.require_capability(Capability::RunSleepCycle).is_err());

        assert!(matches!(
            authenticate(&store, &config, Some("egm_wrong"), false).unwrap_err(),
            Error::InvalidToken
        ));
    }

    #[test]
    fn expired_session_is_rejected() {
        let (store, config) = store_and_config();
        let mut req = request(None);
        req.ttl_minutes = Some(1);
        let created = create_session(&store, &config, &req).unwrap();
        // Manufacture expiry by rewriting the row's expires_at via revoke
        // semantics: easier to assert with a fresh record check.
        let record = store
            .get_session_by_token_hash(&hash_token(&created.token))
            .unwrap()
            .unwrap();
        assert!(!record.is_expired(Utc::now()));
        assert!(record.is_expired(Utc::now() + Duration::minutes(2)));
    }

    #[test]
    fn missing_token_needs_trusted_local() {
        let (store, config) = store_and_config();
        assert!(authenticate(&store, &config, None, false).is_err());
        let ctx = authenticate(&store, &config, None, true).unwrap();
        assert!(ctx.session.is_none());
        assert!(ctx.allowed_scopes().is_none());
    }

    #[test]
    fn gateway_disabled_is_unrestricted() {
        let (store, mut config) = store_and_config();
        config.policy.gateway_enabled = false;
        let ctx = authenticate(&store, &config, None, false).unwrap();
        ctx.require_capability(Capability::RunSleepCycle).unwrap();
    }
}
