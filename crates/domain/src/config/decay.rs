//! Decay, multi-trace and forgetting-pass knobs.

use serde::{Deserialize, Serialize};

/// Multi-trace decay parameters. The three traces decay at sharply
/// different per-day rates (`λ_fast ≫ λ_mid ≫ λ_slow`) and cascade a
/// fraction downward each sleep tick, modeling consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enable_forgetting: bool,
    /// Trace weights; composite strength is the weighted sum, clamped.
    pub s_fast_weight: f64,
    pub s_mid_weight: f64,
    pub s_slow_weight: f64,
    /// Per-day multiplicative decay rates.
    pub s_fast_decay_rate: f64,
    pub s_mid_decay_rate: f64,
    pub s_slow_decay_rate: f64,
    pub cascade_fast_to_mid: f64,
    pub cascade_mid_to_slow: f64,
    /// Memories below this composite strength are forgotten (unless
    /// protected by references).
    pub forgetting_threshold: f64,
    pub access_strength_boost: f64,
    /// Boost multiplier applied on repeat access within the dampening
    /// window.
    pub access_dampening_factor: f64,
    /// Repeat accesses within this window are dampened.
    pub access_dampening_window_minutes: i64,
    pub promotion_access_threshold: i64,
    pub promotion_strength_threshold: f64,
    pub conflict_similarity_threshold: f64,
    /// Honor strong/weak subscriber refs during forgetting.
    pub ref_aware: bool,
    /// Raise the effective forget threshold by this factor when weak refs
    /// exist (dampens eviction without preventing it).
    pub weak_ref_threshold_factor: f64,
    pub weak_ref_ttl_days: i64,
    /// Tombstone by default; hard delete only via the explicit purge op.
    pub use_tombstone_deletion: bool,
}

impl Default for DecayConfig {
    fn default() -> Self {
        DecayConfig {
            enable_forgetting: true,
            s_fast_weight: 0.2,
            s_mid_weight: 0.3,
            s_slow_weight: 0.5,
            s_fast_decay_rate: 0.20,
            s_mid_decay_rate: 0.05,
            s_slow_decay_rate: 0.005,
            cascade_fast_to_mid: 0.1,
            cascade_mid_to_slow: 0.05,
            forgetting_threshold: 0.1,
            access_strength_boost: 0.02,
            access_dampening_factor: 0.5,
            access_dampening_window_minutes: 10,
            promotion_access_threshold: 3,
            promotion_strength_threshold: 0.7,
            conflict_similarity_threshold: 0.85,
            ref_aware: true,
            weak_ref_threshold_factor: 0.5,
            weak_ref_ttl_days: 14,
            use_tombstone_deletion: true,
        }
    }
}

/// The three composable forgetting passes of the sleep cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgettingConfig {
    pub enable_interference_pruning: bool,
    pub enable_redundancy_collapse: bool,
    pub enable_homeostasis: bool,
    /// Memories weaker than this are not worth interference checks.
    pub interference_min_strength: f64,
    pub redundancy_collapse_threshold: f64,
    pub homeostasis_budget_per_namespace: i64,
    pub homeostasis_pressure_factor: f64,
}

impl Default for ForgettingConfig {
    fn default() -> Self {
        ForgettingConfig {
            enable_interference_pruning: true,
            enable_redundancy_collapse: true,
            enable_homeostasis: true,
            interference_min_strength: 0.2,
            redundancy_collapse_threshold: 0.92,
            homeostasis_budget_per_namespace: 5000,
            homeostasis_pressure_factor: 0.1,
        }
    }
}
