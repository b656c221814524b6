//! Lane state merging.
//!
//! List fields union with stable order; scalar fields overwrite only when
//! the incoming value is non-empty, recording a conflict whenever a
//! non-empty previous value is being replaced by a different one.

use serde::Deserialize;

use engram_domain::handoff::{LaneState, LaneStatus, MergeConflict};

/// Incoming checkpoint payload as submitted by an agent.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckpointPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub task_summary: Option<String>,
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

impl CheckpointPayload {
    /// Normalize: trim list entries, dedupe with stable order, map the
    /// status through the lenient parser.
    pub fn normalized(&self) -> CheckpointPayload {
        CheckpointPayload {
            status: self
                .status
                .as_deref()
                .map(|s| LaneStatus::parse_or(s, LaneStatus::Active).as_str().to_string()),
            task_summary: self
                .task_summary
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            decisions_made: merge_list_values(&[], &self.decisions_made),
            files_touched: merge_list_values(&[], &self.files_touched),
            todos_remaining: merge_list_values(&[], &self.todos_remaining),
            blockers: merge_list_values(&[], &self.blockers),
            key_commands: merge_list_values(&[], &self.key_commands),
            test_results: merge_list_values(&[], &self.test_results),
            context_snapshot: self.context_snapshot.clone().filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Union two string lists, trimming entries, dropping blanks and keeping
/// first-seen order.
pub fn merge_list_values(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for value in existing.iter().chain(incoming.iter()) {
        let item = value.trim();
        if !item.is_empty() && !merged.iter().any(|m| m == item) {
            merged.push(item.to_string());
        }
    }
    merged
}

/// Merge an incoming payload into the current lane state. Returns the
/// merged state plus a conflict entry per scalar field where both sides
/// held different non-empty values.
pub fn merge_state(
    current: &LaneState,
    incoming: &CheckpointPayload,
) -> (LaneState, Vec<MergeConflict>) {
    let mut conflicts: Vec<MergeConflict> = Vec::new();
    let mut merged = LaneState {
        task_summary: current.task_summary.clone(),
        decisions_made: merge_list_values(&current.decisions_made, &incoming.decisions_made),
        files_touched: merge_list_values(&current.files_touched, &incoming.files_touched),
        todos_remaining: merge_list_values(&current.todos_remaining, &incoming.todos_remaining),
        blockers: merge_list_values(&current.blockers, &incoming.blockers),
        key_commands: merge_list_values(&current.key_commands, &incoming.key_commands),
        test_results: merge_list_values(&current.test_results, &incoming.test_results),
        context_snapshot: current.context_snapshot.clone(),
    };

    if let Some(summary) = incoming.task_summary.as_deref().filter(|s| !s.is_empty()) {
        if !merged.task_summary.is_empty() && merged.task_summary != summary {
            conflicts.push(MergeConflict {
                field: "task_summary".into(),
                previous: merged.task_summary.clone(),
                incoming: summary.to_string(),
            });
        }
        merged.task_summary = summary.to_string();
    }

    if let Some(snapshot) = incoming.context_snapshot.as_deref().filter(|s| !s.is_empty()) {
        if let Some(previous) = merged.context_snapshot.as_deref().filter(|s| !s.is_empty()) {
            if previous != snapshot {
                conflicts.push(MergeConflict {
                    field: "context_snapshot".into(),
                    previous: previous.to_string(),
                    incoming: snapshot.to_string(),
                });
            }
        }
        merged.context_snapshot = Some(snapshot.to_string());
    }

    (merged, conflicts)
}

/// Drop duplicate conflict entries (same field + values).
pub fn dedupe_conflicts(conflicts: Vec<MergeConflict>) -> Vec<MergeConflict> {
    let mut out: Vec<MergeConflict> = Vec::new();
    for conflict in conflicts {
        if !out.contains(&conflict) {
            out.push(conflict);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_union_is_stable_and_deduped() {
        let merged = merge_list_values(
            &["a".into(), "b".into()],
            &[" b ".into(), "c".into(), "".into()],
        );
        assert_eq!(merged, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn empty_incoming_scalar_never_overwrites() {
        let current = LaneState {
            task_summary: "refactor the parser".into(),
            ..Default::default()
        };
        let (merged, conflicts) = merge_state(&current, &CheckpointPayload::default());
        assert_eq!(merged.task_summary, "refactor the parser");
        assert!(conflicts.is_empty());
    }

    #[test]
    fn differing_scalars_record_a_conflict() {
        let current = LaneState {
            task_summary: "refactor the parser".into(),
            ..Default::default()
        };
        let incoming = CheckpointPayload {
            task_summary: Some("rewrite the lexer".into()),
            ..Default::default()
        };
        let (merged, conflicts) = merge_state(&current, &incoming);
        assert_eq!(merged.task_summary, "rewrite the lexer");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "task_summary");
        assert_eq!(conflicts[0].previous, "refactor the parser");
        assert_eq!(conflicts[0].incoming, "rewrite the lexer");
    }

    #[test]
    fn same_scalar_value_is_not_a_conflict() {
        let current = LaneState {
            task_summary: "same".into(),
            ..Default::default()
        };
        let incoming = CheckpointPayload {
            task_summary: Some("same".into()),
            ..Default::default()
        };
        let (_, conflicts) = merge_state(&current, &incoming);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn normalization_cleans_lists_and_status() {
        let payload = CheckpointPayload {
            status: Some("PAUSED".into()),
            task_summary: Some("  x  ".into()),
            todos_remaining: vec!["a".into(), "a".into(), " ".into()],
            ..Default::default()
        };
        let normalized = payload.normalized();
        assert_eq!(normalized.status.as_deref(), Some("paused"));
        assert_eq!(normalized.task_summary.as_deref(), Some("x"));
        assert_eq!(normalized.todos_remaining, vec!["a".to_string()]);
    }

    #[test]
    fn conflict_dedupe() {
        let c = MergeConflict {
            field: "task_summary".into(),
            previous: "a".into(),
            incoming: "b".into(),
        };
        let out = dedupe_conflicts(vec![c.clone(), c.clone()]);
        assert_eq!(out.len(), 1);
    }
}
