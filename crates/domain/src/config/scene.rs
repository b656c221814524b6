//! Episodic scene grouping knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub enable_scenes: bool,
    /// A gap larger than this starts a new scene.
    pub scene_time_gap_minutes: i64,
    /// Cosine similarity below this against the scene centroid is a topic
    /// shift.
    pub scene_topic_threshold: f64,
    pub auto_close_inactive_minutes: i64,
    pub max_scene_memories: usize,
    pub use_llm_summarization: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            enable_scenes: true,
            scene_time_gap_minutes: 30,
            scene_topic_threshold: 0.55,
            auto_close_inactive_minutes: 120,
            max_scene_memories: 50,
            use_llm_summarization: true,
        }
    }
}
