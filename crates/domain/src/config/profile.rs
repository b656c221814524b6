//! Character profile tracking knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub enable_profiles: bool,
    pub auto_detect_profiles: bool,
    pub use_llm_extraction: bool,
    pub self_profile_auto_create: bool,
    pub max_facts_per_profile: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            enable_profiles: true,
            auto_detect_profiles: true,
            use_llm_extraction: true,
            self_profile_auto_create: true,
            max_facts_per_profile: 100,
        }
    }
}
