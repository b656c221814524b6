//! Cross-agent handoff bus knobs.

use serde::{Deserialize, Serialize};

use crate::handoff::LaneStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub enable_handoff: bool,
    /// Link related memories/scenes onto each checkpoint.
    pub auto_enrich: bool,
    pub max_sessions_per_user: usize,
    pub strict_handoff_auth: bool,
    /// Allow well-known agents to self-bootstrap a handoff policy.
    pub allow_auto_trusted_bootstrap: bool,
    /// Lanes idle longer than this are penalized during lane selection.
    pub lane_inactivity_minutes: i64,
    pub max_lanes_per_user: usize,
    pub max_checkpoints_per_lane: usize,
    pub resume_statuses: Vec<LaneStatus>,
    pub auto_trusted_agents: Vec<String>,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        HandoffConfig {
            enable_handoff: true,
            auto_enrich: true,
            max_sessions_per_user: 100,
            strict_handoff_auth: true,
            allow_auto_trusted_bootstrap: false,
            lane_inactivity_minutes: 240,
            max_lanes_per_user: 50,
            max_checkpoints_per_lane: 200,
            resume_statuses: vec![LaneStatus::Active, LaneStatus::Paused],
            auto_trusted_agents: vec![
                "pm".into(),
                "design".into(),
                "frontend".into(),
                "backend".into(),
                "claude-code".into(),
                "codex".into(),
                "chatgpt".into(),
            ],
        }
    }
}
