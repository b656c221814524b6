//! Replay distillation (episodic → semantic consolidation) knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillationConfig {
    pub enable_distillation: bool,
    /// Episodes per LLM batch.
    pub batch_size: usize,
    /// Skip the cycle entirely when the window yields fewer episodes.
    pub min_episodes: usize,
    /// Group by shared scene first; fall back to fixed-size chunks.
    pub scene_grouping: bool,
    pub time_window_hours: i64,
    pub max_semantic_per_batch: usize,
    /// Initial composite strength of a freshly distilled semantic fact.
    pub initial_strength: f64,
}

impl Default for DistillationConfig {
    fn default() -> Self {
        DistillationConfig {
            enable_distillation: true,
            batch_size: 20,
            min_episodes: 5,
            scene_grouping: true,
            time_window_hours: 24,
            max_semantic_per_batch: 5,
            initial_strength: 0.8,
        }
    }
}
