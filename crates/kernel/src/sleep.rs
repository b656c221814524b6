//! The sleep orchestrator: stale-ref GC, decay, the three forgetting
//! passes, replay distillation and the daily digest, composed per user.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use engram_domain::config::Config;
use engram_domain::error::Result;
use engram_index::VectorIndex;
use engram_providers::{Embedder, Llm};
use engram_store::{MemoryQuery, Store};

use crate::decay::{run_decay, DecayReport};
use crate::digest::build_daily_digest;
use crate::distill::{run_distillation, DistillationReport};
use crate::forgetting::{
    homeostatic_normalize, interference_prune, redundancy_collapse, HomeostasisReport,
    InterferenceReport, RedundancyReport,
};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SleepOptions {
    /// Run for one user, or every known user when unset.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Distillation target date (`YYYY-MM-DD`); defaults to yesterday.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub apply_decay: Option<bool>,
    #[serde(default)]
    pub cleanup_stale_refs: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSleepReport {
    pub user_id: String,
    pub decay: DecayReport,
    pub interference: InterferenceReport,
    pub redundancy: RedundancyReport,
    pub homeostasis: HomeostasisReport,
    pub distillation: DistillationReport,
    pub digest_date: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SleepTotals {
    pub promoted: usize,
    pub forgotten: usize,
    pub distilled: usize,
    pub demoted: usize,
    pub fused: usize,
    pub stale_refs_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SleepReport {
    pub users: Vec<UserSleepReport>,
    pub totals: SleepTotals,
}

pub async fn run_sleep_cycle(
    store: &Store,
    index: &dyn VectorIndex,
    llm: &dyn Llm,
    embedder: &dyn Embedder,
    config: &Config,
    options: &SleepOptions,
) -> Result<SleepReport> {
    let now = Utc::now();
    let mut totals = SleepTotals::default();

    if options
        .cleanup_stale_refs
        .unwrap_or(config.sleep.cleanup_stale_refs)
    {
        totals.stale_refs_removed = store.cleanup_stale_subscribers(now)?;
    }

    let users = match &options.user_id {
        Some(user_id) => vec![user_id.clone()],
        None => store.list_user_ids()?,
    };
    let digest_date = now.date_naive().to_string();

    let mut reports = Vec::new();
    for user_id in users {
        let mut decay = DecayReport::default();
        if options.apply_decay.unwrap_or(config.sleep.apply_decay) {
            decay = run_decay(store, index, &config.decay, &user_id, now).await?;
        }

        // Forgetting passes work on a snapshot of the surviving memories;
        // anything added mid-cycle waits for the next one.
        let snapshot = store.list_memories(&MemoryQuery {
            user_id: Some(user_id.clone()),
            ..Default::default()
        })?;
        let interference = interference_prune(
            store,
            index,
            llm,
            &config.decay,
            &config.forgetting,
            &user_id,
            &snapshot,
        )
        .await?;
        let redundancy = redundancy_collapse(
            store,
            index,
            llm,
            embedder,
            &config.forgetting,
            &user_id,
            &snapshot,
        )
        .await?;
        let homeostasis =
            homeostatic_normalize(store, index, &config.decay, &config.forgetting, &user_id)
                .await?;

        let distillation = run_distillation(
            store,
            index,
            llm,
            embedder,
            &config.distillation,
            &user_id,
            options.date,
        )
        .await?;

        build_daily_digest(store, &user_id, &digest_date)?;

        totals.promoted += decay.promoted;
        totals.forgotten += decay.forgotten + homeostasis.forgotten;
        totals.distilled += distillation.semantic_created;
        totals.demoted += interference.demoted;
        totals.fused += redundancy.memories_fused;

        store.log_decay_run(decay.decayed, decay.forgotten, decay.promoted)?;

        reports.push(UserSleepReport {
            user_id,
            decay,
            interference,
            redundancy,
            homeostasis,
            distillation,
            digest_date: digest_date.clone(),
        });
    }

    tracing::info!(
        users = reports.len(),
        promoted = totals.promoted,
        forgotten = totals.forgotten,
        distilled = totals.distilled,
        stale_refs_removed = totals.stale_refs_removed,
        "sleep cycle complete"
    );

    Ok(SleepReport {
        users: reports,
        totals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_domain::memory::MemoryRecord;
    use engram_index::flat::FlatIndex;
    use engram_providers::{MockLlm, SimpleEmbedder};

    #[tokio::test]
    async fn quiesced_store_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(64);
        let llm = MockLlm::new();
        let embedder = SimpleEmbedder::new(64);
        let config = Config::default();

        let m = MemoryRecord::new("stable fact", "u1");
        store.add_memory(&m).unwrap();

        let first = run_sleep_cycle(&store, &index, &llm, &embedder, &config, &SleepOptions::default())
            .await
            .unwrap();
        assert_eq!(first.totals.forgotten, 0);

        // Idempotent modulo time: an immediate second cycle changes
        // nothing observable.
        let second = run_sleep_cycle(&store, &index, &llm, &embedder, &config, &SleepOptions::default())
            .await
            .unwrap();
        assert_eq!(second.totals.forgotten, 0);
        assert_eq!(second.totals.distilled, 0);
        assert!(store.get_memory(&m.id, false).unwrap().is_some());
    }

    #[tokio::test]
    async fn cycle_targets_a_single_user_when_asked() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(64);
        let llm = MockLlm::new();
        let embedder = SimpleEmbedder::new(64);
        let config = Config::default();

        store.add_memory(&MemoryRecord::new("a", "u1")).unwrap();
        store.add_memory(&MemoryRecord::new("b", "u2")).unwrap();

        let report = run_sleep_cycle(
            &store,
            &index,
            &llm,
            &embedder,
            &config,
            &SleepOptions {
                user_id: Some("u1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(report.users.len(), 1);
        assert_eq!(report.users[0].user_id, "u1");
        // The digest was written for the targeted user.
        let date = Utc::now().date_naive().to_string();
        assert!(store.get_daily_digest("u1", &date).unwrap().is_some());
        assert!(store.get_daily_digest("u2", &date).unwrap().is_none());
    }
}
