//! Capability vocabulary for the policy gateway.
//!
//! Every kernel operation maps to exactly one capability; sessions carry the
//! set they were issued with and agent policies clamp what can be issued.

use serde::{Deserialize, Serialize};

/// A single grantable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Search,
    ProposeWrite,
    ReadScene,
    ReviewCommits,
    ResolveConflicts,
    ReadDigest,
    ReadTrust,
    ManageNamespaces,
    RunSleepCycle,
    ReadHandoff,
    WriteHandoff,
}

impl Capability {
    /// The wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Search => "search",
            Capability::ProposeWrite => "propose_write",
            Capability::ReadScene => "read_scene",
            Capability::ReviewCommits => "review_commits",
            Capability::ResolveConflicts => "resolve_conflicts",
            Capability::ReadDigest => "read_digest",
            Capability::ReadTrust => "read_trust",
            Capability::ManageNamespaces => "manage_namespaces",
            Capability::RunSleepCycle => "run_sleep_cycle",
            Capability::ReadHandoff => "read_handoff",
            Capability::WriteHandoff => "write_handoff",
        }
    }

    pub fn parse(value: &str) -> Option<Capability> {
        match value.trim().to_ascii_lowercase().as_str() {
            "search" => Some(Capability::Search),
            "propose_write" => Some(Capability::ProposeWrite),
            "read_scene" => Some(Capability::ReadScene),
            "review_commits" => Some(Capability::ReviewCommits),
            "resolve_conflicts" => Some(Capability::ResolveConflicts),
            "read_digest" => Some(Capability::ReadDigest),
            "read_trust" => Some(Capability::ReadTrust),
            "manage_namespaces" => Some(Capability::ManageNamespaces),
            "run_sleep_cycle" => Some(Capability::RunSleepCycle),
            "read_handoff" => Some(Capability::ReadHandoff),
            "write_handoff" => Some(Capability::WriteHandoff),
        _ => None,
        }
    }

    /// Capabilities granted to a plain (non-handoff) agent by default.
    pub fn default_set() -> Vec<Capability> {
        vec![
            Capability::Search,
            Capability::ProposeWrite,
            Capability::ReadScene,
            Capability::ReviewCommits,
            Capability::ResolveConflicts,
            Capability::ReadDigest,
            Capability::ReadTrust,
            Capability::ManageNamespaces,
            Capability::RunSleepCycle,
        ]
    }

    /// The session-bus capabilities; these require an explicit agent policy
    /// unless auto-trusted bootstrap is enabled.
    pub fn handoff_set() -> Vec<Capability> {
        vec![Capability::ReadHandoff, Capability::WriteHandoff]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_capability() {
        for cap in Capability::default_set()
            .into_iter()
            .chain(Capability::handoff_set())
        {
            assert_eq!(Capability::parse(cap.as_str()), Some(cap));
        }
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_eq!(Capability::parse("root"), None);
        assert_eq!(Capability::parse(""), None);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Capability::ProposeWrite).unwrap();
        assert_eq!(json, "\"propose_write\"");
    }
}
