//! Memory records and their classification enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Episodic memories record events; semantic memories record durable facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Episodic,
    #[default]
    Semantic,
}

/// Short-memory-layer vs long-memory-layer. New memories start in SML and
/// are promoted once accessed often enough at sufficient strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLayer {
    #[default]
    Sml,
    Lml,
}

/// Confidentiality scope a reader session must hold to see the memory
/// unmasked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidentialityScope {
    #[default]
    Work,
    Personal,
    Finance,
    Health,
    Private,
}

impl ConfidentialityScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidentialityScope::Work => "work",
            ConfidentialityScope::Personal => "personal",
            ConfidentialityScope::Finance => "finance",
            ConfidentialityScope::Health => "health",
            ConfidentialityScope::Private => "private",
        }
    }

    /// Lenient parse: unknown values normalize to `work`, mirroring how
    /// untyped callers were historically handled.
    pub fn parse_lenient(value: &str) -> ConfidentialityScope {
        match value.trim().to_ascii_lowercase().as_str() {
            "personal" => ConfidentialityScope::Personal,
            "finance" => ConfidentialityScope::Finance,
            "health" => ConfidentialityScope::Health,
            "private" => ConfidentialityScope::Private,
            _ => ConfidentialityScope::Work,
        }
    }

    pub fn all() -> Vec<ConfidentialityScope> {
        vec![
            ConfidentialityScope::Work,
            ConfidentialityScope::Personal,
            ConfidentialityScope::Finance,
            ConfidentialityScope::Health,
            ConfidentialityScope::Private,
        ]
    }
}

impl std::fmt::Display for ConfidentialityScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    #[default]
    Normal,
    Sensitive,
    Secret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    #[default]
    Active,
    Tombstoned,
}

/// A stored memory. Relations (`scene_id`, `related_memories`,
/// `source_memories`) are non-owning id references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    /// The memory text.
    pub content: String,
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub source_app: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    /// Idempotency key: a second write with the same `(agent_id,
    /// source_event_id)` replays the first result.
    #[serde(default)]
    pub source_event_id: Option<String>,

    #[serde(default)]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub layer: MemoryLayer,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub confidentiality_scope: ConfidentialityScope,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub status: MemoryStatus,

    /// Composite strength: `w_f·s_fast + w_m·s_mid + w_s·s_slow`, clamped
    /// to [0, 1].
    pub strength: f64,
    pub s_fast: f64,
    pub s_mid: f64,
    pub s_slow: f64,
    #[serde(default)]
    pub access_count: i64,
    pub last_accessed: DateTime<Utc>,
    /// Legacy single-trace rate; kept for pre-multi-trace rows.
    #[serde(default)]
    pub decay_lambda: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub scene_id: Option<String>,
    #[serde(default)]
    pub related_memories: Vec<String>,
    /// Distillation provenance: episodic ids this semantic fact came from.
    #[serde(default)]
    pub source_memories: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_importance() -> f64 {
    0.5
}

impl MemoryRecord {
    /// Build a fresh record with kernel defaults: full strength across all
    /// three traces, SML layer, active status.
    pub fn new(content: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            user_id: user_id.into(),
            agent_id: None,
            app_id: None,
            run_id: None,
            source_app: None,
            source_type: None,
            source_event_id: None,
            memory_type: MemoryType::Semantic,
            layer: MemoryLayer::Sml,
            namespace: default_namespace(),
            confidentiality_scope: ConfidentialityScope::Work,
            sensitivity: Sensitivity::Normal,
            importance: default_importance(),
            immutable: false,
            status: MemoryStatus::Active,
            strength: 1.0,
            s_fast: 1.0,
            s_mid: 1.0,
            s_slow: 1.0,
            access_count: 0,
            last_accessed: now,
            decay_lambda: 0.0,
            created_at: now,
            updated_at: now,
            categories: Vec::new(),
            scene_id: None,
            related_memories: Vec::new(),
            source_memories: Vec::new(),
            metadata: serde_json::Value::Object(Default::default()),
            embedding: None,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.status == MemoryStatus::Tombstoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parse_is_lenient() {
        assert_eq!(
            ConfidentialityScope::parse_lenient("FINANCE"),
            ConfidentialityScope::Finance
        );
        assert_eq!(
            ConfidentialityScope::parse_lenient("unknown"),
            ConfidentialityScope::Work
        );
    }

    #[test]
    fn new_memory_has_unit_traces() {
        let m = MemoryRecord::new("hello", "u1");
        assert_eq!(m.strength, 1.0);
        assert_eq!((m.s_fast, m.s_mid, m.s_slow), (1.0, 1.0, 1.0));
        assert_eq!(m.layer, MemoryLayer::Sml);
        assert!(!m.is_tombstoned());
    }
}
