//! The three composable forgetting passes of the sleep cycle:
//! interference pruning, redundancy collapse and homeostatic
//! normalization.

use serde::Serialize;

use engram_domain::config::{DecayConfig, ForgettingConfig};
use engram_domain::error::Result;
use engram_domain::memory::{MemoryRecord, MemoryType};
use engram_index::{SearchFilters, VectorIndex};
use engram_providers::{Embedder, Llm};
use engram_store::{MemoryField, MemoryQuery, Store};

use crate::extract::strip_code_fences;

#[derive(Debug, Clone, Default, Serialize)]
pub struct InterferenceReport {
    pub checked: usize,
    pub demoted: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RedundancyReport {
    pub groups_fused: usize,
    pub memories_fused: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HomeostasisReport {
    pub namespaces_over_budget: usize,
    pub pressured: usize,
    pub forgotten: usize,
}

const CONFLICT_PROMPT: &str = "Do these two statements contradict each other? Answer with strict \
JSON: {\"classification\": \"CONTRADICTORY\" | \"COMPATIBLE\" | \"DUPLICATE\"}.\n\nA: ";

/// Ask the LLM whether two memory texts contradict. Parse failures count
/// as COMPATIBLE — the pruner never demotes on a hunch.
async fn classify_conflict(llm: &dyn Llm, a: &str, b: &str) -> String {
    let prompt = format!("{CONFLICT_PROMPT}{a}\nB: {b}");
    match llm.generate(&prompt).await {
        Ok(raw) => serde_json::from_str::<serde_json::Value>(strip_code_fences(&raw))
            .ok()
            .and_then(|v| v.get("classification").and_then(|c| c.as_str()).map(String::from))
            .unwrap_or_else(|| "COMPATIBLE".to_string()),
        Err(e) => {
            tracing::debug!(error = %e, "conflict classification failed");
            "COMPATIBLE".to_string()
        }
    }
}

/// Demote the weaker of each contradictory nearest-neighbor pair to
/// `0.3·strength`.
pub async fn interference_prune(
    store: &Store,
    index: &dyn VectorIndex,
    llm: &dyn Llm,
    decay: &DecayConfig,
    config: &ForgettingConfig,
    user_id: &str,
    memories: &[MemoryRecord],
) -> Result<InterferenceReport> {
    if !config.enable_interference_pruning {
        return Ok(InterferenceReport::default());
    }

    let mut report = InterferenceReport::default();
    for memory in memories {
        if memory.immutable || memory.strength < config.interference_min_strength {
            continue;
        }
        let Some(embedding) = &memory.embedding else {
            continue;
        };
        report.checked += 1;

        let neighbors = index
            .search(embedding, 2, &SearchFilters::for_user(user_id))
            .await?;
        let Some(nearest) = neighbors.iter().find(|n| n.id != memory.id) else {
            continue;
        };
        if nearest.score < decay.conflict_similarity_threshold {
            continue;
        }
        let Some(neighbor) = store.get_memory(&nearest.id, false)? else {
            continue;
        };

        let classification = classify_conflict(llm, &memory.content, &neighbor.content).await;
        if classification != "CONTRADICTORY" {
            continue;
        }

        let (target_id, old_strength) = if memory.strength <= neighbor.strength {
            (memory.id.clone(), memory.strength)
        } else {
            (neighbor.id.clone(), neighbor.strength)
        };
        let new_strength = old_strength * 0.3;
        store.update_memory(&target_id, &[MemoryField::Strength(new_strength)])?;
        store.log_event(
            &target_id,
            "INTERFERENCE_DEMOTE",
            serde_json::json!({"old_strength": old_strength, "new_strength": new_strength}),
        )?;
        report.demoted += 1;
    }
    Ok(report)
}

const FUSION_PROMPT: &str = "Fuse the following near-duplicate memories into one concise \
statement that preserves every distinct fact. Return only the fused text.\n\n";

/// Fuse clusters of near-duplicate memories; originals are tombstoned and
/// the fused memory unions their provenance.
pub async fn redundancy_collapse(
    store: &Store,
    index: &dyn VectorIndex,
    llm: &dyn Llm,
    embedder: &dyn Embedder,
    config: &ForgettingConfig,
    user_id: &str,
    memories: &[MemoryRecord],
) -> Result<RedundancyReport> {
    if !config.enable_redundancy_collapse {
        return Ok(RedundancyReport::default());
    }

    let mut report = RedundancyReport::default();
    let mut already_fused: std::collections::HashSet<String> = std::collections::HashSet::new();

    for memory in memories {
        if already_fused.contains(&memory.id) || memory.immutable {
            continue;
        }
        let Some(embedding) = &memory.embedding else {
            continue;
        };

        let neighbors = index
            .search(embedding, 5, &SearchFilters::for_user(user_id))
            .await?;
        let mut group: Vec<MemoryRecord> = vec![memory.clone()];
        for neighbor in &neighbors {
            if neighbor.id == memory.id
                || already_fused.contains(&neighbor.id)
                || neighbor.score < config.redundancy_collapse_threshold
            {
                continue;
            }
            if let Some(candidate) = store.get_memory(&neighbor.id, false)? {
                if !candidate.immutable {
                    group.push(candidate);
                }
            }
        }
        if group.len() < 2 {
            continue;
        }

        let numbered = group
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let fused_text = match llm.generate(&format!("{FUSION_PROMPT}{numbered}")).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => group[0].content.clone(),
        };

        let mut fused = MemoryRecord::new(fused_text, user_id);
        fused.memory_type = MemoryType::Semantic;
        fused.namespace = memory.namespace.clone();
        fused.confidentiality_scope = memory.confidentiality_scope;
        fused.importance = group
            .iter()
            .map(|m| m.importance)
            .fold(0.0f64, f64::max);
        fused.strength = group.iter().map(|m| m.strength).fold(0.0f64, f64::max);
        for m in &group {
            fused.source_memories.push(m.id.clone());
            for category in &m.categories {
                if !fused.categories.contains(category) {
                    fused.categories.push(category.clone());
                }
            }
        }
        fused.embedding = Some(embedder.embed(&fused.content).await?);

        store.add_memory(&fused)?;
        index
            .insert(
                &fused.id,
                fused.embedding.clone().unwrap_or_default(),
                engram_index::PointPayload {
                    user_id: user_id.to_string(),
                    agent_id: fused.agent_id.clone(),
                    namespace: Some(fused.namespace.clone()),
                    memory_type: Some(fused.memory_type),
                },
            )
            .await?;

        let group_ids: Vec<String> = group.iter().map(|m| m.id.clone()).collect();
        for id in &group_ids {
            store.delete_memory(id, true)?;
            store.log_event(
                id,
                "FUSED",
                serde_json::json!({"fused_into": fused.id}),
            )?;
            already_fused.insert(id.clone());
        }
        index.delete(&group_ids).await?;

        report.groups_fused += 1;
        report.memories_fused += group.len();
    }
    Ok(report)
}

/// Apply pressure-based extra decay to the weakest memories of any
/// namespace over budget. Budget exactly equal to the count triggers no
/// pressure.
pub async fn homeostatic_normalize(
    store: &Store,
    index: &dyn VectorIndex,
    decay: &DecayConfig,
    config: &ForgettingConfig,
    user_id: &str,
) -> Result<HomeostasisReport> {
    if !config.enable_homeostasis {
        return Ok(HomeostasisReport::default());
    }

    let budget = config.homeostasis_budget_per_namespace;
    let pressure_factor = config.homeostasis_pressure_factor;
    let mut report = HomeostasisReport::default();

    for (namespace, count) in store.count_by_namespace(user_id)? {
        if count <= budget {
            continue;
        }
        report.namespaces_over_budget += 1;
        let excess_ratio = (count - budget) as f64 / budget as f64;

        let mut weakest = store.list_memories(&MemoryQuery {
            user_id: Some(user_id.to_string()),
            namespace: Some(namespace.clone()),
            ..Default::default()
        })?;
        weakest.sort_by(|a, b| {
            a.strength
                .partial_cmp(&b.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut forget_ids: Vec<String> = Vec::new();
        for memory in &weakest {
            if memory.immutable {
                continue;
            }
            let pressure = memory.strength * pressure_factor * excess_ratio;
            let new_strength = (memory.strength - pressure).max(0.0);
            if new_strength < decay.forgetting_threshold {
                store.delete_memory(&memory.id, decay.use_tombstone_deletion)?;
                store.log_event(
                    &memory.id,
                    "FORGOTTEN",
                    serde_json::json!({"by": "homeostasis", "namespace": namespace}),
                )?;
                forget_ids.push(memory.id.clone());
                report.forgotten += 1;
            } else {
                store.update_memory(&memory.id, &[MemoryField::Strength(new_strength)])?;
                report.pressured += 1;
            }
        }
        if !forget_ids.is_empty() {
            index.delete(&forget_ids).await?;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_index::flat::FlatIndex;
    use engram_providers::{MockLlm, SimpleEmbedder};

    async fn seed(
        store: &Store,
        index: &FlatIndex,
        embedder: &SimpleEmbedder,
        user: &str,
        content: &str,
        strength: f64,
    ) -> MemoryRecord {
        let mut m = MemoryRecord::new(content, user);
        m.strength = strength;
        m.embedding = Some(embedder.embed(content).await.unwrap());
        store.add_memory(&m).unwrap();
        index
            .insert(
                &m.id,
                m.embedding.clone().unwrap(),
                engram_index::PointPayload {
                    user_id: user.to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        m
    }

    #[tokio::test]
    async fn contradictory_neighbor_demotes_the_weaker() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(128);
        let embedder = SimpleEmbedder::new(128);
        let llm = MockLlm::with_responses(vec![
            "{\"classification\": \"CONTRADICTORY\"}".into(),
        ]);

        // Near-identical token sets so cosine clears the 0.85 threshold.
        let strong = seed(&store, &index, &embedder, "u1", "the deploy key lives in vault alpha", 0.9).await;
        let weak = seed(&store, &index, &embedder, "u1", "the deploy key lives in vault beta alpha", 0.5).await;

        let report = interference_prune(
            &store,
            &index,
            &llm,
            &DecayConfig::default(),
            &ForgettingConfig::default(),
            "u1",
            &[strong.clone()],
        )
        .await
        .unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.demoted, 1);
        let demoted = store.get_memory(&weak.id, false).unwrap().unwrap();
        assert!((demoted.strength - 0.15).abs() < 1e-9);
        assert_eq!(
            store.get_memory(&strong.id, false).unwrap().unwrap().strength,
            0.9
        );
    }

    #[tokio::test]
    async fn compatible_neighbors_are_left_alone() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(128);
        let embedder = SimpleEmbedder::new(128);
        let llm = MockLlm::with_responses(vec!["{\"classification\": \"COMPATIBLE\"}".into()]);

        let a = seed(&store, &index, &embedder, "u1", "likes single origin espresso beans", 0.9).await;
        let _b = seed(&store, &index, &embedder, "u1", "likes single origin espresso beans daily", 0.5).await;

        let report = interference_prune(
            &store,
            &index,
            &llm,
            &DecayConfig::default(),
            &ForgettingConfig::default(),
            "u1",
            &[a],
        )
        .await
        .unwrap();
        assert_eq!(report.demoted, 0);
    }

    #[tokio::test]
    async fn redundant_cluster_fuses_with_provenance() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(128);
        let embedder = SimpleEmbedder::new(128);
        let llm = MockLlm::with_responses(vec!["prefers green tea in the morning".into()]);

        let a = seed(&store, &index, &embedder, "u1", "prefers green tea every morning", 0.8).await;
        let b = seed(&store, &index, &embedder, "u1", "prefers green tea every morning", 0.6).await;

        let report = redundancy_collapse(
            &store,
            &index,
            &llm,
            &embedder,
            &ForgettingConfig::default(),
            "u1",
            &[a.clone(), b.clone()],
        )
        .await
        .unwrap();

        assert_eq!(report.groups_fused, 1);
        assert_eq!(report.memories_fused, 2);
        assert!(store.get_memory(&a.id, false).unwrap().is_none());
        assert!(store.get_memory(&b.id, false).unwrap().is_none());

        // The fused memory carries both originals as provenance.
        let survivors = store
            .list_memories(&MemoryQuery {
                user_id: Some("u1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(survivors.len(), 1);
        let fused = &survivors[0];
        assert!(fused.source_memories.contains(&a.id));
        assert!(fused.source_memories.contains(&b.id));
        assert_eq!(fused.strength, 0.8);
    }

    #[tokio::test]
    async fn immutable_members_block_fusion() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(128);
        let embedder = SimpleEmbedder::new(128);
        let llm = MockLlm::new();

        let mut a = MemoryRecord::new("pinned note about launch date", "u1");
        a.immutable = true;
        a.embedding = Some(embedder.embed(&a.content).await.unwrap());
        store.add_memory(&a).unwrap();

        let report = redundancy_collapse(
            &store,
            &index,
            &llm,
            &embedder,
            &ForgettingConfig::default(),
            "u1",
            &[a],
        )
        .await
        .unwrap();
        assert_eq!(report.groups_fused, 0);
    }

    #[tokio::test]
    async fn budget_equal_to_count_applies_no_pressure() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(8);
        let embedder = SimpleEmbedder::new(8);
        let config = ForgettingConfig {
            homeostasis_budget_per_namespace: 2,
            ..Default::default()
        };
        seed(&store, &index, &embedder, "u1", "one", 0.5).await;
        seed(&store, &index, &embedder, "u1", "two", 0.5).await;

        let report = homeostatic_normalize(
            &store,
            &index,
            &DecayConfig::default(),
            &config,
            "u1",
        )
        .await
        .unwrap();
        assert_eq!(report.namespaces_over_budget, 0);
        assert_eq!(report.pressured + report.forgotten, 0);
    }

    #[tokio::test]
    async fn over_budget_namespace_sheds_weakest() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(8);
        let embedder = SimpleEmbedder::new(8);
        let config = ForgettingConfig {
            homeostasis_budget_per_namespace: 1,
            homeostasis_pressure_factor: 1.0,
            ..Default::default()
        };
        seed(&store, &index, &embedder, "u1", "weak", 0.05).await;
        seed(&store, &index, &embedder, "u1", "strong", 0.9).await;
        let mut pinned = MemoryRecord::new("pinned", "u1");
        pinned.immutable = true;
        pinned.strength = 0.01;
        store.add_memory(&pinned).unwrap();

        let report = homeostatic_normalize(
            &store,
            &index,
            &DecayConfig::default(),
            &config,
            "u1",
        )
        .await
        .unwrap();
        assert_eq!(report.namespaces_over_budget, 1);
        assert!(report.forgotten >= 1);
        // Immutable memories are never pressured.
        assert!(store.get_memory(&pinned.id, false).unwrap().is_some());
    }
}
