//! Sleep-cycle scheduling knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// Run the background sleep worker.
    pub enabled: bool,
    pub interval_minutes: u64,
    pub apply_decay: bool,
    /// Garbage-collect expired weak subscriber refs each cycle.
    pub cleanup_stale_refs: bool,
}

impl Default for SleepConfig {
    fn default() -> Self {
        SleepConfig {
            enabled: true,
            interval_minutes: 60,
            apply_decay: true,
            cleanup_stale_refs: true,
        }
    }
}
