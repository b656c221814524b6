//! Episodic scenes and character profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An episodic cluster of memories sharing time proximity, topic and
/// (optionally) location. A memory belongs to at most one open scene per
/// user; `end_time == None` means the scene is still open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub memory_ids: Vec<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Running centroid of member embeddings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub access_count: i64,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub tombstone: bool,
}

fn default_strength() -> f64 {
    1.0
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Scene {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Last moment of activity: `end_time` when set, else `start_time`.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.start_time)
    }
}

/// A scene returned from search, annotated with its match score.
#[derive(Debug, Clone, Serialize)]
pub struct SceneHit {
    #[serde(flatten)]
    pub scene: Scene,
    pub search_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    /// The one profile describing the user themselves.
    #[serde(rename = "self")]
    SelfProfile,
    #[default]
    Contact,
    Entity,
}

impl ProfileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::SelfProfile => "self",
            ProfileType::Contact => "contact",
            ProfileType::Entity => "entity",
        }
    }

    pub fn parse(value: &str) -> Option<ProfileType> {
        match value {
            "self" => Some(ProfileType::SelfProfile),
            "contact" => Some(ProfileType::Contact),
            "entity" => Some(ProfileType::Entity),
            _ => None,
        }
    }
}

/// Persona facts and preferences for the user (`self`) or people/entities
/// they mention. Exactly one `self` profile exists per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub profile_type: ProfileType,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_strength")]
    pub strength: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, kind: ProfileType) -> Self {
        let now = Utc::now();
        Profile {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            profile_type: kind,
            narrative: None,
            facts: Vec::new(),
            preferences: Vec::new(),
            relationships: Vec::new(),
            aliases: Vec::new(),
            embedding: None,
            strength: 1.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive match on name or any alias.
    pub fn answers_to(&self, name: &str) -> bool {
        let needle = name.trim().to_lowercase();
        self.name.to_lowercase() == needle
            || self.aliases.iter().any(|a| a.to_lowercase() == needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_profile_serializes_as_self() {
        let json = serde_json::to_string(&ProfileType::SelfProfile).unwrap();
        assert_eq!(json, "\"self\"");
        assert_eq!(ProfileType::parse("self"), Some(ProfileType::SelfProfile));
    }

    #[test]
    fn answers_to_is_alias_aware() {
        let mut p = Profile::new("u1", "Alexandra", ProfileType::Contact);
        p.aliases.push("Alex".into());
        assert!(p.answers_to("alexandra"));
        assert!(p.answers_to("ALEX"));
        assert!(!p.answers_to("Sasha"));
    }
}
