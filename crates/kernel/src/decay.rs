//! Multi-trace decay, consolidation cascade, promotion and ref-aware
//! forgetting.
//!
//! Each memory carries three traces decaying at sharply different
//! per-day rates. A fraction of the fast trace cascades into the mid
//! trace and of the mid into the slow trace each tick, so repeatedly
//! refreshed memories consolidate into slow, durable storage.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use engram_domain::config::DecayConfig;
use engram_domain::error::Result;
use engram_domain::memory::{MemoryLayer, MemoryRecord};
use engram_index::VectorIndex;
use engram_store::{MemoryField, MemoryQuery, Store, TraceUpdate};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecayReport {
    pub decayed: usize,
    pub forgotten: usize,
    pub promoted: usize,
}

/// The decayed traces and composite strength for one memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayedTraces {
    pub s_fast: f64,
    pub s_mid: f64,
    pub s_slow: f64,
    pub strength: f64,
}

/// Pure decay step: multiplicative per-trace decay over `elapsed_days`,
/// then the consolidation cascade, then the clamped weighted sum.
///
/// The cascade scales with elapsed time (capped at one day's worth), so
/// a zero-elapsed tick is a true no-op and back-to-back cycles do not
/// compound.
pub fn decay_traces(config: &DecayConfig, memory: &MemoryRecord, elapsed_days: f64) -> DecayedTraces {
    let elapsed = elapsed_days.max(0.0);
    let mut s_fast = memory.s_fast * (-config.s_fast_decay_rate * elapsed).exp();
    let mut s_mid = memory.s_mid * (-config.s_mid_decay_rate * elapsed).exp();
    let mut s_slow = memory.s_slow * (-config.s_slow_decay_rate * elapsed).exp();

    let cascade_scale = elapsed.min(1.0);
    let to_mid = s_fast * config.cascade_fast_to_mid * cascade_scale;
    s_fast -= to_mid;
    s_mid = (s_mid + to_mid).min(1.0);

    let to_slow = s_mid * config.cascade_mid_to_slow * cascade_scale;
    s_mid -= to_slow;
    s_slow = (s_slow + to_slow).min(1.0);

    DecayedTraces {
        s_fast,
        s_mid,
        s_slow,
        strength: composite_strength(config, s_fast, s_mid, s_slow),
    }
}

pub fn composite_strength(config: &DecayConfig, s_fast: f64, s_mid: f64, s_slow: f64) -> f64 {
    (config.s_fast_weight * s_fast + config.s_mid_weight * s_mid + config.s_slow_weight * s_slow)
        .clamp(0.0, 1.0)
}

/// One decay tick over all of a user's non-immutable memories.
pub async fn run_decay(
    store: &Store,
    index: &dyn VectorIndex,
    config: &DecayConfig,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<DecayReport> {
    let memories = store.list_memories(&MemoryQuery {
        user_id: Some(user_id.to_string()),
        ..Default::default()
    })?;

    let mut report = DecayReport::default();
    let mut trace_updates: Vec<TraceUpdate> = Vec::new();
    let mut forget_ids: Vec<String> = Vec::new();

    for memory in &memories {
        if memory.immutable {
            continue;
        }
        // Anchor on the most recent write so repeated ticks never
        // double-count the same elapsed window.
        let anchor = memory.last_accessed.max(memory.updated_at);
        let elapsed_days = (now - anchor).num_seconds().max(0) as f64 / 86_400.0;
        let traces = decay_traces(config, memory, elapsed_days);

        let protected = if config.ref_aware {
            let refcount = store.get_refcount(&memory.id)?;
            if refcount.strong_count > 0 {
                true
            } else {
                // Weak refs halve the effective threshold, dampening
                // eviction without preventing it outright.
                let effective = if refcount.weak_count > 0 {
                    config.forgetting_threshold * config.weak_ref_threshold_factor
                } else {
                    config.forgetting_threshold
                };
                traces.strength >= effective
            }
        } else {
            traces.strength >= config.forgetting_threshold
        };

        let below_threshold = traces.strength < config.forgetting_threshold;
        if config.enable_forgetting && below_threshold && !protected {
            forget_ids.push(memory.id.clone());
            report.forgotten += 1;
            continue;
        }

        trace_updates.push(TraceUpdate {
            memory_id: memory.id.clone(),
            s_fast: traces.s_fast,
            s_mid: traces.s_mid,
            s_slow: traces.s_slow,
            strength: traces.strength,
        });
        report.decayed += 1;

        if memory.layer == MemoryLayer::Sml
            && memory.access_count >= config.promotion_access_threshold
            && traces.strength >= config.promotion_strength_threshold
        {
            store.update_memory(&memory.id, &[MemoryField::Layer(MemoryLayer::Lml)])?;
            store.log_event(
                &memory.id,
                "PROMOTED",
                serde_json::json!({"from": "sml", "to": "lml", "strength": traces.strength}),
            )?;
            report.promoted += 1;
        }
    }

    store.update_strength_bulk(&trace_updates)?;

    for memory_id in &forget_ids {
        store.delete_memory(memory_id, config.use_tombstone_deletion)?;
        store.log_event(memory_id, "FORGOTTEN", serde_json::json!({"by": "decay"}))?;
    }
    if !forget_ids.is_empty() {
        index.delete(&forget_ids).await?;
    }

    if report.forgotten > 0 || report.promoted > 0 {
        tracing::info!(
            user_id,
            decayed = report.decayed,
            forgotten = report.forgotten,
            promoted = report.promoted,
            "decay tick complete"
        );
    }
    Ok(report)
}

/// Retrieval touch: bump access count and boost the fast trace, dampened
/// on repeat access within the configured window.
pub fn boost_access(
    store: &Store,
    config: &DecayConfig,
    memory: &MemoryRecord,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut boost = config.access_strength_boost;
    let window = Duration::minutes(config.access_dampening_window_minutes);
    if now - memory.last_accessed < window {
        boost *= config.access_dampening_factor;
    }
    let s_fast = (memory.s_fast + boost).min(1.0);
    let strength = composite_strength(config, s_fast, memory.s_mid, memory.s_slow);
    store.update_memory(
        &memory.id,
        &[
            MemoryField::Traces {
                fast: s_fast,
                mid: memory.s_mid,
                slow: memory.s_slow,
            },
            MemoryField::Strength(strength),
            MemoryField::AccessCount(memory.access_count + 1),
            MemoryField::LastAccessed(now),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_index::flat::FlatIndex;
    use engram_store::refcounts::RefType;

    fn config() -> DecayConfig {
        DecayConfig::default()
    }

    fn aged_memory(user: &str, days_old: i64) -> MemoryRecord {
        let mut m = MemoryRecord::new("fading fact", user);
        m.last_accessed = Utc::now() - Duration::days(days_old);
        m.s_fast = 0.01;
        m.s_mid = 0.01;
        m.s_slow = 0.01;
        m.strength = 0.01;
        m
    }

    #[test]
    fn strength_is_clamped_weighted_sum() {
        let cfg = config();
        assert_eq!(composite_strength(&cfg, 1.0, 1.0, 1.0), 1.0);
        assert_eq!(composite_strength(&cfg, 0.0, 0.0, 0.0), 0.0);
        let mid = composite_strength(&cfg, 0.5, 0.5, 0.5);
        assert!((mid - 0.5).abs() < 1e-9);
    }

    #[test]
    fn traces_decay_at_distinct_rates() {
        let cfg = config();
        let m = MemoryRecord::new("x", "u1");
        let decayed = decay_traces(&cfg, &m, 10.0);
        // λ_fast ≫ λ_mid ≫ λ_slow.
        assert!(decayed.s_fast < decayed.s_mid);
        assert!(decayed.s_mid < decayed.s_slow);
        assert!(decayed.strength < 1.0 && decayed.strength > 0.0);
    }

    #[test]
    fn cascade_moves_mass_downward() {
        let cfg = config();
        let mut m = MemoryRecord::new("x", "u1");
        m.s_fast = 1.0;
        m.s_mid = 0.0;
        m.s_slow = 0.0;
        let decayed = decay_traces(&cfg, &m, 1.0);
        assert!(decayed.s_mid > 0.0, "fast cascades into mid");
        assert!(decayed.s_slow > 0.0, "mid cascades into slow");
    }

    #[test]
    fn zero_elapsed_tick_is_a_noop() {
        let cfg = config();
        let mut m = MemoryRecord::new("x", "u1");
        m.s_fast = 0.4;
        m.s_mid = 0.5;
        m.s_slow = 0.6;
        let decayed = decay_traces(&cfg, &m, 0.0);
        assert_eq!((decayed.s_fast, decayed.s_mid, decayed.s_slow), (0.4, 0.5, 0.6));
    }

    #[tokio::test]
    async fn old_weak_memory_is_forgotten() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(8);
        let m = aged_memory("u1", 90);
        store.add_memory(&m).unwrap();

        let report = run_decay(&store, &index, &config(), "u1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.forgotten, 1);
        assert!(store.get_memory(&m.id, false).unwrap().is_none());
        // Tombstoned, not hard-deleted.
        assert!(store.get_memory(&m.id, true).unwrap().is_some());
    }

    #[tokio::test]
    async fn strong_ref_protects_from_forgetting() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(8);
        let m = aged_memory("u1", 90);
        store.add_memory(&m).unwrap();
        store
            .add_subscriber(&m.id, "agent-a", RefType::Strong, None)
            .unwrap();

        let report = run_decay(&store, &index, &config(), "u1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.forgotten, 0);
        assert!(store.get_memory(&m.id, false).unwrap().is_some());

        // Remove the ref; the next cycle forgets it.
        store
            .remove_subscriber(&m.id, "agent-a", RefType::Strong)
            .unwrap();
        let report = run_decay(&store, &index, &config(), "u1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.forgotten, 1);
    }

    #[tokio::test]
    async fn immutable_memories_never_decay() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(8);
        let mut m = MemoryRecord::new("permanent fact", "u1");
        m.last_accessed = Utc::now() - Duration::days(365);
        m.immutable = true;
        store.add_memory(&m).unwrap();

        let report = run_decay(&store, &index, &config(), "u1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.forgotten, 0);
        let got = store.get_memory(&m.id, false).unwrap().unwrap();
        assert_eq!(got.strength, 1.0);
    }

    #[tokio::test]
    async fn promotion_requires_access_and_strength() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(8);
        let mut m = MemoryRecord::new("hot fact", "u1");
        m.access_count = 5;
        store.add_memory(&m).unwrap();

        let report = run_decay(&store, &index, &config(), "u1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(
            store.get_memory(&m.id, false).unwrap().unwrap().layer,
            MemoryLayer::Lml
        );
    }

    #[test]
    fn repeat_access_is_dampened() {
        let store = Store::open_in_memory().unwrap();
        let cfg = config();
        let mut m = MemoryRecord::new("boosted", "u1");
        m.s_fast = 0.5;
        m.s_mid = 0.5;
        m.s_slow = 0.5;
        m.last_accessed = Utc::now() - Duration::days(1);
        store.add_memory(&m).unwrap();

        boost_access(&store, &cfg, &m, Utc::now()).unwrap();
        let after_first = store.get_memory(&m.id, false).unwrap().unwrap();
        assert!((after_first.s_fast - 0.52).abs() < 1e-9);

        // Second access inside the dampening window gets half the boost.
        boost_access(&store, &cfg, &after_first, Utc::now()).unwrap();
        let after_second = store.get_memory(&m.id, false).unwrap().unwrap();
        assert!((after_second.s_fast - 0.53).abs() < 1e-9);
        assert_eq!(after_second.access_count, 2);
    }
}
