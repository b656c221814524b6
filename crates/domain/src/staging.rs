//! Staging commits, conflict stash and identity invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Commit lifecycle. Terminal transitions are one-shot:
/// `PENDING | AUTO_STASHED → APPROVED | REJECTED`. The only sanctioned
/// reverse move is the apply-failure rollback, which returns to `PENDING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitStatus {
    Pending,
    AutoStashed,
    Approved,
    Rejected,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStatus::Pending => "PENDING",
            CommitStatus::AutoStashed => "AUTO_STASHED",
            CommitStatus::Approved => "APPROVED",
            CommitStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<CommitStatus> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(CommitStatus::Pending),
            "AUTO_STASHED" => Some(CommitStatus::AutoStashed),
            "APPROVED" => Some(CommitStatus::Approved),
            "REJECTED" => Some(CommitStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Add,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Add => "ADD",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<ChangeOp> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADD" => Some(ChangeOp::Add),
            "UPDATE" => Some(ChangeOp::Update),
            "DELETE" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

/// One proposed change inside a commit. `patch` carries the memory fields
/// for ADD, or the field deltas for UPDATE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalChange {
    pub id: String,
    pub commit_id: String,
    pub op: ChangeOp,
    /// Target table; currently always `"memory"`.
    pub target: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub patch: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A single detected risk: an invariant contradiction or a semantic
/// near-conflict with an existing memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictNote {
    /// `"invariant"` or `"semantic"`.
    pub kind: String,
    #[serde(default)]
    pub conflict_key: Option<String>,
    #[serde(default)]
    pub existing_memory_id: Option<String>,
    #[serde(default)]
    pub similarity: Option<f64>,
    pub detail: String,
}

/// Pre-apply check results attached to a commit.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommitChecks {
    pub invariants_ok: bool,
    #[serde(default)]
    pub conflicts: Vec<ConflictNote>,
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default)]
    pub apply_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalCommit {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    pub status: CommitStatus,
    pub checks: CommitChecks,
    pub preview: serde_json::Value,
    pub provenance: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StashResolution {
    #[default]
    Unresolved,
    KeepExisting,
    AcceptProposed,
    KeepBoth,
}

impl StashResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            StashResolution::Unresolved => "UNRESOLVED",
            StashResolution::KeepExisting => "KEEP_EXISTING",
            StashResolution::AcceptProposed => "ACCEPT_PROPOSED",
            StashResolution::KeepBoth => "KEEP_BOTH",
        }
    }

    pub fn parse(value: &str) -> Option<StashResolution> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNRESOLVED" => Some(StashResolution::Unresolved),
            "KEEP_EXISTING" => Some(StashResolution::KeepExisting),
            "ACCEPT_PROPOSED" => Some(StashResolution::AcceptProposed),
            "KEEP_BOTH" => Some(StashResolution::KeepBoth),
            _ => None,
        }
    }
}

/// An unresolved contradiction parked for human (or trusted agent)
/// resolution. The source commit stays `AUTO_STASHED` until resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictStash {
    pub id: String,
    pub user_id: String,
    pub conflict_key: String,
    pub existing: serde_json::Value,
    pub proposed: serde_json::Value,
    pub resolution: StashResolution,
    #[serde(default)]
    pub source_commit_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A durable identity fact (`identity.name`, `identity.primary_email`, …)
/// protected from overwrite without explicit resolution. Unique per
/// `(user_id, invariant_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantRecord {
    pub id: String,
    pub user_id: String,
    pub invariant_key: String,
    pub invariant_value: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub source_memory_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_category() -> String {
    "identity".to_string()
}

/// Outcome of `propose_write`/`approve_commit`, as an explicit variant
/// rather than exception-driven flow.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitOutcome {
    Pending {
        commit_id: String,
    },
    AutoStashed {
        commit_id: String,
        stash_id: String,
    },
    Approved {
        commit_id: String,
        auto_merged: bool,
        memory_ids: Vec<String>,
    },
    Rejected {
        commit_id: String,
    },
    ApplyFailed {
        commit_id: String,
        rolled_back: usize,
        error: String,
    },
}

impl CommitOutcome {
    pub fn commit_id(&self) -> &str {
        match self {
            CommitOutcome::Pending { commit_id }
            | CommitOutcome::AutoStashed { commit_id, .. }
            | CommitOutcome::Approved { commit_id, .. }
            | CommitOutcome::Rejected { commit_id }
            | CommitOutcome::ApplyFailed { commit_id, .. } => commit_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_status_round_trips() {
        for s in [
            CommitStatus::Pending,
            CommitStatus::AutoStashed,
            CommitStatus::Approved,
            CommitStatus::Rejected,
        ] {
            assert_eq!(CommitStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(CommitStatus::parse("auto_stashed"), Some(CommitStatus::AutoStashed));
        assert_eq!(CommitStatus::parse("nope"), None);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let out = CommitOutcome::AutoStashed {
            commit_id: "c1".into(),
            stash_id: "s1".into(),
        };
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["status"], "AUTO_STASHED");
        assert_eq!(v["stash_id"], "s1");
    }
}
