//! Policy gateway and trust auto-merge knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Master switch for capability/scope enforcement.
    pub gateway_enabled: bool,
    /// Deny sessions for agents without an explicit or wildcard policy.
    pub require_agent_policy: bool,
    /// Loopback requests without agent context may skip the token check.
    pub trusted_local_bypass: bool,
    pub write_quota_per_agent_per_hour: u32,
    pub write_quota_per_user_per_hour: u32,
    pub default_session_ttl_minutes: i64,
}

impl PolicyConfig {
    pub fn agent_quota(&self) -> Option<u32> {
        (self.write_quota_per_agent_per_hour > 0).then_some(self.write_quota_per_agent_per_hour)
    }

    pub fn user_quota(&self) -> Option<u32> {
        (self.write_quota_per_user_per_hour > 0).then_some(self.write_quota_per_user_per_hour)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            gateway_enabled: true,
            require_agent_policy: false,
            trusted_local_bypass: true,
            write_quota_per_agent_per_hour: 0,
            write_quota_per_user_per_hour: 0,
            default_session_ttl_minutes: 60,
        }
    }
}

/// Guardrails for trust-gated auto-merge of proposals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMergeConfig {
    pub enabled: bool,
    pub trust_threshold: f64,
    pub min_total: i64,
    pub min_approved: i64,
    pub max_reject_rate: f64,
}

impl Default for AutoMergeConfig {
    fn default() -> Self {
        AutoMergeConfig {
            enabled: false,
            trust_threshold: 0.8,
            min_total: 5,
            min_approved: 3,
            max_reject_rate: 0.2,
        }
    }
}
