//! Dual-retrieval and context-packet knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Per-unit-of-scene-signal boost added to intersecting semantic hits.
    pub intersection_boost_weight: f64,
    /// Hard cap on the total intersection boost.
    pub intersection_boost_cap: f64,
    pub context_packet_max_tokens: usize,
    pub context_packet_max_items: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            intersection_boost_weight: 0.22,
            intersection_boost_cap: 0.35,
            context_packet_max_tokens: 800,
            context_packet_max_items: 8,
        }
    }
}
