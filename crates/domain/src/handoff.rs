//! Handoff lanes, checkpoints and legacy session digests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LaneStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl LaneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneStatus::Active => "active",
            LaneStatus::Paused => "paused",
            LaneStatus::Completed => "completed",
            LaneStatus::Abandoned => "abandoned",
        }
    }

    /// Strict parse used for filters: unknown values are an error, not a
    /// silent default.
    pub fn parse_strict(value: &str) -> Result<LaneStatus> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(LaneStatus::Active),
            "paused" => Ok(LaneStatus::Paused),
            "completed" => Ok(LaneStatus::Completed),
            "abandoned" => Ok(LaneStatus::Abandoned),
            other => Err(Error::InvalidStatus(format!(
                "{other:?}; allowed: active, paused, completed, abandoned"
            ))),
        }
    }

    /// Lenient parse for stored payloads: unknown values fall back.
    pub fn parse_or(value: &str, default: LaneStatus) -> LaneStatus {
        LaneStatus::parse_strict(value).unwrap_or(default)
    }
}

impl std::fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mergeable working state of a lane. List fields union with stable
/// order; scalar fields overwrite only when the incoming value is
/// non-empty, recording a conflict when both sides differ.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LaneState {
    #[serde(default)]
    pub task_summary: String,
    #[serde(default)]
    pub decisions_made: Vec<String>,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub todos_remaining: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub key_commands: Vec<String>,
    #[serde(default)]
    pub test_results: Vec<String>,
    #[serde(default)]
    pub context_snapshot: Option<String>,
}

/// A scalar-field divergence recorded during state merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConflict {
    pub field: String,
    pub previous: String,
    pub incoming: String,
}

/// A persistent cross-agent thread of work keyed by
/// `(user, repo, lane_type)`. `version` strictly increases on every
/// persisted update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffLane {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub repo_path: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_lane_type")]
    pub lane_type: String,
    pub status: LaneStatus,
    #[serde(default)]
    pub objective: Option<String>,
    pub current_state: LaneState,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_scope")]
    pub confidentiality_scope: String,
    pub last_checkpoint_at: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_lane_type() -> String {
    "general".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_scope() -> String {
    "work".to_string()
}

/// Append-only snapshot written by one agent against a lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffCheckpoint {
    pub id: String,
    pub lane_id: String,
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub agent_role: Option<String>,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default)]
    pub task_summary: Option<String>,
    pub state: LaneState,
    #[serde(default)]
    pub merge_conflicts: Vec<MergeConflict>,
    pub created_at: DateTime<Utc>,
}

fn default_event_type() -> String {
    "tool_complete".to_string()
}

/// A merge-conflict row persisted whenever a checkpoint produced conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConflictRecord {
    pub id: String,
    pub lane_id: String,
    #[serde(default)]
    pub checkpoint_id: Option<String>,
    pub user_id: String,
    pub conflict_fields: Vec<String>,
    pub previous_state: serde_json::Value,
    pub incoming_state: serde_json::Value,
    pub resolved_state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Legacy flat session row kept for backwards compatibility with the
/// pre-lane digest API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffSession {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub repo_id: Option<String>,
    pub status: LaneStatus,
    pub task_summary: String,
    #[serde(default)]
    pub decisions_made: Vec<String>,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub todos_remaining: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub key_commands: Vec<String>,
    #[serde(default)]
    pub test_results: Vec<String>,
    #[serde(default)]
    pub context_snapshot: Option<String>,
    #[serde(default)]
    pub linked_memory_ids: Vec<String>,
    #[serde(default)]
    pub linked_scene_ids: Vec<String>,
    #[serde(default)]
    pub lane_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: DateTime<Utc>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_scope")]
    pub confidentiality_scope: String,
}

/// Stable repository identity used for lane routing: a `git:`-prefixed
/// digest of the normalized remote when available, else a `path:` digest of
/// the canonical path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepoIdentity {
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub repo_path: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub remote: Option<String>,
}

/// Parse a list of status filters strictly; empty input keeps the
/// provided fallback.
pub fn normalize_status_list(
    values: Option<&[String]>,
    fallback: &[LaneStatus],
) -> Result<Vec<LaneStatus>> {
    let Some(values) = values else {
        return Ok(fallback.to_vec());
    };
    let mut out: Vec<LaneStatus> = Vec::new();
    for value in values {
        let item = value.trim();
        if item.is_empty() {
            continue;
        }
        let status = LaneStatus::parse_strict(item)?;
        if !out.contains(&status) {
            out.push(status);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_rejects_unknown_status() {
        assert!(LaneStatus::parse_strict("archived").is_err());
        assert_eq!(LaneStatus::parse_strict("Paused").unwrap(), LaneStatus::Paused);
    }

    #[test]
    fn normalize_keeps_fallback_when_none() {
        let out = normalize_status_list(None, &[LaneStatus::Active, LaneStatus::Paused]).unwrap();
        assert_eq!(out, vec![LaneStatus::Active, LaneStatus::Paused]);
    }

    #[test]
    fn normalize_dedupes_and_errors_on_invalid() {
        let values = vec!["active".to_string(), "ACTIVE".to_string()];
        let out = normalize_status_list(Some(&values), &[]).unwrap();
        assert_eq!(out, vec![LaneStatus::Active]);

        let bad = vec!["bogus".to_string()];
        assert!(normalize_status_list(Some(&bad), &[]).is_err());
    }

    #[test]
    fn explicit_empty_filter_stays_empty() {
        let values: Vec<String> = vec![" ".to_string()];
        let out = normalize_status_list(Some(&values), &[LaneStatus::Active]).unwrap();
        assert!(out.is_empty());
    }
}
