//! Sessions, agent policies, trust and namespaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::memory::ConfidentialityScope;

/// A capability-scoped session. The raw token is never persisted — only
/// its SHA-256 hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub token_hash: String,
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// `None` means unrestricted (local user); `Some(vec![])` means the
    /// session sees everything redacted.
    #[serde(default)]
    pub allowed_confidentiality_scopes: Option<Vec<ConfidentialityScope>>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// `["*"]` means unrestricted.
    #[serde(default)]
    pub namespaces: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    pub fn namespace_unrestricted(&self) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|n| n == "*")
    }
}

/// The maximal grant an agent may receive for a user. Policies never grant
/// anything by themselves — session issuance intersects the request with
/// the policy. `agent_id = "*"` matches any agent of that user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPolicy {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub allowed_confidentiality_scopes: Vec<ConfidentialityScope>,
    #[serde(default)]
    pub allowed_capabilities: Vec<Capability>,
    #[serde(default)]
    pub allowed_namespaces: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rolling proposal statistics per `(user, agent)`, with the derived trust
/// score gating auto-merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrust {
    pub user_id: String,
    pub agent_id: String,
    pub total_proposals: i64,
    pub approved_proposals: i64,
    pub rejected_proposals: i64,
    pub auto_stashed_proposals: i64,
    #[serde(default)]
    pub last_proposed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_approved_at: Option<DateTime<Utc>>,
    /// `0.7·approval_rate + 0.3·recency`, recency decaying linearly over
    /// 30 days since the last approval.
    pub trust_score: f64,
}

impl AgentTrust {
    pub fn empty(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        AgentTrust {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            total_proposals: 0,
            approved_proposals: 0,
            rejected_proposals: 0,
            auto_stashed_proposals: 0,
            last_proposed_at: None,
            last_approved_at: None,
            trust_score: 0.0,
        }
    }

    pub fn reject_rate(&self) -> f64 {
        if self.total_proposals == 0 {
            0.0
        } else {
            self.rejected_proposals as f64 / self.total_proposals as f64
        }
    }
}

/// A named memory partition. Every user gets a `default` namespace seeded
/// at migration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A per-agent, per-capability grant on a namespace; may expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacePermission {
    pub id: String,
    pub namespace_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub capability: String,
    pub granted_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> SessionRecord {
        SessionRecord {
            id: "s1".into(),
            token_hash: "h".into(),
            user_id: "u1".into(),
            agent_id: None,
            allowed_confidentiality_scopes: None,
            capabilities: vec![Capability::Search],
            namespaces: vec!["*".into()],
            expires_at: Utc::now() + Duration::minutes(5),
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[test]
    fn expiry_and_revocation() {
        let s = session();
        assert!(!s.is_expired(Utc::now()));
        assert!(s.is_expired(Utc::now() + Duration::minutes(6)));
        assert!(!s.is_revoked());
    }

    #[test]
    fn wildcard_namespace_is_unrestricted() {
        let s = session();
        assert!(s.namespace_unrestricted());
    }

    #[test]
    fn reject_rate_handles_zero_total() {
        assert_eq!(AgentTrust::empty("u", "a").reject_rate(), 0.0);
    }
}
