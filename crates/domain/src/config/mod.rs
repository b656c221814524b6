//! Immutable runtime configuration.
//!
//! [`Config`] is built once at process start from environment variables and
//! then threaded explicitly through the kernel — no global mutable state.
//! Feature flags are plain fields; defaults match the reference deployment.

mod decay;
mod distillation;
mod handoff;
mod policy;
mod profile;
mod providers;
mod retrieval;
mod scene;
mod server;
mod sleep;

pub use decay::{DecayConfig, ForgettingConfig};
pub use distillation::DistillationConfig;
pub use handoff::HandoffConfig;
pub use policy::{AutoMergeConfig, PolicyConfig};
pub use profile::ProfileConfig;
pub use providers::{EmbedderConfig, LlmConfig, VectorConfig};
pub use retrieval::RetrievalConfig;
pub use scene::SceneConfig;
pub use server::ServerConfig;
pub use sleep::SleepConfig;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for all persisted state: `engram.db` plus the `vector_index/`
    /// sibling directory.
    pub data_dir: PathBuf,
    pub server: ServerConfig,
    pub policy: PolicyConfig,
    pub automerge: AutoMergeConfig,
    pub decay: DecayConfig,
    pub forgetting: ForgettingConfig,
    pub distillation: DistillationConfig,
    pub retrieval: RetrievalConfig,
    pub scene: SceneConfig,
    pub profile: ProfileConfig,
    pub handoff: HandoffConfig,
    pub sleep: SleepConfig,
    pub llm: LlmConfig,
    pub embedder: EmbedderConfig,
    pub vector: VectorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            policy: PolicyConfig::default(),
            automerge: AutoMergeConfig::default(),
            decay: DecayConfig::default(),
            forgetting: ForgettingConfig::default(),
            distillation: DistillationConfig::default(),
            retrieval: RetrievalConfig::default(),
            scene: SceneConfig::default(),
            profile: ProfileConfig::default(),
            handoff: HandoffConfig::default(),
            sleep: SleepConfig::default(),
            llm: LlmConfig::default(),
            embedder: EmbedderConfig::default(),
            vector: VectorConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".engram")
}

impl Config {
    /// Read every recognized `ENGRAM_*` variable once and freeze the result.
    pub fn from_env() -> Config {
        let mut cfg = Config::default();

        if let Some(dir) = env_string("ENGRAM_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }

        cfg.server.admin_key = env_string("ENGRAM_ADMIN_KEY");
        if let Some(origins) = env_string("ENGRAM_CORS_ORIGINS") {
            cfg.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        cfg.policy.gateway_enabled = env_flag("ENGRAM_V2_POLICY_GATEWAY", cfg.policy.gateway_enabled);
        cfg.policy.require_agent_policy =
            env_flag("ENGRAM_V2_REQUIRE_AGENT_POLICY", cfg.policy.require_agent_policy);
        cfg.policy.write_quota_per_agent_per_hour = env_parse(
            "ENGRAM_V2_POLICY_WRITE_QUOTA_PER_AGENT_PER_HOUR",
            cfg.policy.write_quota_per_agent_per_hour,
        );
        cfg.policy.write_quota_per_user_per_hour = env_parse(
            "ENGRAM_V2_POLICY_WRITE_QUOTA_PER_USER_PER_HOUR",
            cfg.policy.write_quota_per_user_per_hour,
        );

        cfg.decay.ref_aware = env_flag("ENGRAM_V2_REF_AWARE_DECAY", cfg.decay.ref_aware);

        cfg.automerge.enabled = env_flag("ENGRAM_V2_TRUST_AUTOMERGE", cfg.automerge.enabled);
        cfg.automerge.trust_threshold = env_parse(
            "ENGRAM_V2_AUTO_MERGE_TRUST_THRESHOLD",
            cfg.automerge.trust_threshold,
        );
        cfg.automerge.min_total =
            env_parse("ENGRAM_V2_AUTO_MERGE_MIN_TOTAL", cfg.automerge.min_total);
        cfg.automerge.min_approved =
            env_parse("ENGRAM_V2_AUTO_MERGE_MIN_APPROVED", cfg.automerge.min_approved);
        cfg.automerge.max_reject_rate = env_parse(
            "ENGRAM_V2_AUTO_MERGE_MAX_REJECT_RATE",
            cfg.automerge.max_reject_rate,
        );

        cfg.sleep.enabled = env_flag("ENGRAM_V2_SLEEP_CYCLE_ENABLED", cfg.sleep.enabled);
        cfg.sleep.interval_minutes = env_parse(
            "ENGRAM_V2_SLEEP_CYCLE_INTERVAL_MINUTES",
            cfg.sleep.interval_minutes,
        );
        cfg.sleep.apply_decay =
            env_flag("ENGRAM_V2_SLEEP_CYCLE_APPLY_DECAY", cfg.sleep.apply_decay);
        cfg.sleep.cleanup_stale_refs =
            env_flag("ENGRAM_V2_SLEEP_CYCLE_REF_GC", cfg.sleep.cleanup_stale_refs);

        cfg.retrieval.intersection_boost_weight = env_parse(
            "ENGRAM_V2_DUAL_INTERSECTION_BOOST_WEIGHT",
            cfg.retrieval.intersection_boost_weight,
        )
        .clamp(0.0, 1.0);
        cfg.retrieval.intersection_boost_cap = env_parse(
            "ENGRAM_V2_DUAL_INTERSECTION_BOOST_CAP",
            cfg.retrieval.intersection_boost_cap,
        )
        .clamp(0.0, 1.0);

        cfg
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("engram.db")
    }

    pub fn vector_index_dir(&self) -> PathBuf {
        self.data_dir.join("vector_index")
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Truthy parse matching the reference semantics: `1/true/yes/on` enable,
/// anything else disables; unset keeps the default.
fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.policy.gateway_enabled);
        assert!(!cfg.automerge.enabled);
        assert_eq!(cfg.decay.forgetting_threshold, 0.1);
        assert_eq!(cfg.retrieval.intersection_boost_weight, 0.22);
        assert!(cfg.data_dir.ends_with(".engram"));
    }

    #[test]
    fn flag_parsing_is_truthy() {
        std::env::set_var("ENGRAM_TEST_FLAG_A", "yes");
        std::env::set_var("ENGRAM_TEST_FLAG_B", "0");
        assert!(env_flag("ENGRAM_TEST_FLAG_A", false));
        assert!(!env_flag("ENGRAM_TEST_FLAG_B", true));
        assert!(env_flag("ENGRAM_TEST_FLAG_UNSET", true));
    }

    #[test]
    fn config_serializes_to_toml() {
        let cfg = Config::default();
        let rendered = toml::to_string(&cfg).unwrap();
        assert!(rendered.contains("forgetting_threshold"));
    }
}
