//! Replay distillation: batch episodic memories from a time window and
//! extract durable semantic facts with the LLM, with provenance rows
//! pointing back at the source episodes.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use engram_domain::config::DistillationConfig;
use engram_domain::error::Result;
use engram_domain::memory::{MemoryLayer, MemoryRecord, MemoryType};
use engram_index::{PointPayload, SearchFilters, VectorIndex};
use engram_providers::{Embedder, Llm};
use engram_store::history::DistillationRunCounts;
use engram_store::{MemoryQuery, Store};

use crate::extract::strip_code_fences;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DistillationReport {
    pub skipped: bool,
    pub episodes_sampled: usize,
    pub batches_processed: usize,
    pub semantic_created: usize,
    pub semantic_deduplicated: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

const DISTILLATION_PROMPT_HEAD: &str = "You are consolidating episodic memories into durable \
semantic knowledge. From the episodes below, extract up to {max_facts} general facts worth \
keeping long-term. Return strict JSON:\n\
{\"semantic_facts\": [{\"content\": \"...\", \"importance\": 0.0-1.0, \
\"source_episodes\": [\"id\", ...]}]}\n\nEpisodes:\n";

/// Similarity above which a candidate fact is considered already known
/// and counted as deduplicated instead of created.
const DEDUP_SIMILARITY: f64 = 0.97;

/// Run one distillation cycle for a user over `date` (default:
/// yesterday). Fewer than `min_episodes` in the window skips the cycle.
pub async fn run_distillation(
    store: &Store,
    index: &dyn VectorIndex,
    llm: &dyn Llm,
    embedder: &dyn Embedder,
    config: &DistillationConfig,
    user_id: &str,
    date: Option<NaiveDate>,
) -> Result<DistillationReport> {
    if !config.enable_distillation {
        return Ok(DistillationReport {
            skipped: true,
            ..Default::default()
        });
    }

    let target = date.unwrap_or_else(|| (Utc::now() - Duration::days(1)).date_naive());
    let window_start = target.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    let window_end = window_start.map(|start| start + Duration::hours(config.time_window_hours));

    let episodes = store.list_memories(&MemoryQuery {
        user_id: Some(user_id.to_string()),
        memory_type: Some(MemoryType::Episodic),
        created_after: window_start,
        created_before: window_end,
        limit: Some(config.batch_size * 5),
        ..Default::default()
    })?;

    if episodes.len() < config.min_episodes {
        return Ok(DistillationReport {
            skipped: true,
            episodes_sampled: episodes.len(),
            ..Default::default()
        });
    }

    let batches = group_episodes(config, &episodes);
    let mut report = DistillationReport {
        episodes_sampled: episodes.len(),
        batches_processed: batches.len(),
        ..Default::default()
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    for batch in &batches {
        match distill_batch(store, index, llm, embedder, config, user_id, &run_id, batch).await {
            Ok((created, deduplicated)) => {
                report.semantic_created += created;
                report.semantic_deduplicated += deduplicated;
            }
            Err(e) => {
                tracing::warn!(error = %e, "distillation batch failed");
                report.errors += 1;
            }
        }
    }

    let logged = store.log_distillation_run(
        user_id,
        &DistillationRunCounts {
            episodes_sampled: report.episodes_sampled,
            semantic_created: report.semantic_created,
            semantic_deduplicated: report.semantic_deduplicated,
            errors: report.errors,
        },
    )?;
    report.run_id = Some(logged);
    Ok(report)
}

/// Group episodes by shared `scene_id` (splitting oversized groups), or
/// into plain fixed-size chunks when scene grouping is off.
fn group_episodes(
    config: &DistillationConfig,
    episodes: &[MemoryRecord],
) -> Vec<Vec<MemoryRecord>> {
    let batch_size = config.batch_size.max(1);
    if !config.scene_grouping {
        return episodes
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
    }

    let mut by_scene: Vec<(Option<String>, Vec<MemoryRecord>)> = Vec::new();
    for episode in episodes {
        match by_scene
            .iter_mut()
            .find(|(scene_id, _)| *scene_id == episode.scene_id)
        {
            Some((_, group)) => group.push(episode.clone()),
            None => by_scene.push((episode.scene_id.clone(), vec![episode.clone()])),
        }
    }

    let mut batches = Vec::new();
    for (_, group) in by_scene {
        for chunk in group.chunks(batch_size) {
            batches.push(chunk.to_vec());
        }
    }
    batches
}

#[allow(clippy::too_many_arguments)]
async fn distill_batch(
    store: &Store,
    index: &dyn VectorIndex,
    llm: &dyn Llm,
    embedder: &dyn Embedder,
    config: &DistillationConfig,
    user_id: &str,
    run_id: &str,
    batch: &[MemoryRecord],
) -> Result<(usize, usize)> {
    let episodes_text = batch
        .iter()
        .map(|ep| format!("[{}] ({}): {}", ep.id, ep.created_at.to_rfc3339(), ep.content))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = DISTILLATION_PROMPT_HEAD
        .replace("{max_facts}", &config.max_semantic_per_batch.to_string())
        + &episodes_text;

    let raw = llm.generate(&prompt).await?;
    let parsed: serde_json::Value = match serde_json::from_str(strip_code_fences(&raw)) {
        Ok(value) => value,
        Err(_) => {
            // Soft error: invalid JSON yields zero facts for this batch.
            tracing::warn!("distillation LLM returned invalid JSON");
            return Ok((0, 0));
        }
    };
    let Some(facts) = parsed.get("semantic_facts").and_then(|f| f.as_array()) else {
        return Ok((0, 0));
    };

    let batch_ids: Vec<String> = batch.iter().map(|ep| ep.id.clone()).collect();
    let mut created = 0;
    let mut deduplicated = 0;

    for fact in facts.iter().take(config.max_semantic_per_batch) {
        let Some(content) = fact.get("content").and_then(|c| c.as_str()) else {
            continue;
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let importance = fact
            .get("importance")
            .and_then(|i| i.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let source_episodes: Vec<String> = fact
            .get("source_episodes")
            .and_then(|s| s.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .filter(|ids: &Vec<String>| !ids.is_empty())
            .unwrap_or_else(|| batch_ids.clone());

        let embedding = embedder.embed(content).await?;
        // Dedup against existing semantic memories.
        let near = index
            .search(
                &embedding,
                1,
                &SearchFilters {
                    user_id: Some(user_id.to_string()),
                    memory_type: Some(MemoryType::Semantic),
                    ..Default::default()
                },
            )
            .await?;
        if near.first().map(|hit| hit.score >= DEDUP_SIMILARITY) == Some(true) {
            deduplicated += 1;
            continue;
        }

        let mut memory = MemoryRecord::new(content, user_id);
        memory.memory_type = MemoryType::Semantic;
        memory.layer = MemoryLayer::Lml;
        memory.importance = importance;
        memory.strength = config.initial_strength;
        memory.s_fast = config.initial_strength;
        memory.s_mid = config.initial_strength;
        memory.s_slow = config.initial_strength;
        memory.source_memories = source_episodes.clone();
        memory.metadata = serde_json::json!({
            "is_distilled": true,
            "distillation_source_count": source_episodes.len(),
        });
        memory.embedding = Some(embedding.clone());

        store.add_memory(&memory)?;
        index
            .insert(
                &memory.id,
                embedding,
                PointPayload {
                    user_id: user_id.to_string(),
                    agent_id: None,
                    namespace: Some(memory.namespace.clone()),
                    memory_type: Some(MemoryType::Semantic),
                },
            )
            .await?;
        store.add_distillation_provenance(&memory.id, &source_episodes, run_id)?;
        created += 1;
    }

    Ok((created, deduplicated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_index::flat::FlatIndex;
    use engram_providers::{MockLlm, SimpleEmbedder};

    fn episode(user: &str, content: &str, scene: Option<&str>) -> MemoryRecord {
        let mut m = MemoryRecord::new(content, user);
        m.memory_type = MemoryType::Episodic;
        m.scene_id = scene.map(String::from);
        m.created_at = Utc::now() - Duration::days(1);
        m
    }

    fn config(min_episodes: usize) -> DistillationConfig {
        DistillationConfig {
            min_episodes,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn too_few_episodes_skips() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(64);
        let llm = MockLlm::new();
        let embedder = SimpleEmbedder::new(64);
        store.add_memory(&episode("u1", "only one", None)).unwrap();

        let report = run_distillation(&store, &index, &llm, &embedder, &config(5), "u1", None)
            .await
            .unwrap();
        assert!(report.skipped);
        assert_eq!(report.semantic_created, 0);
    }

    #[tokio::test]
    async fn distills_facts_with_provenance() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(64);
        let embedder = SimpleEmbedder::new(64);
        let mut episode_ids = Vec::new();
        for i in 0..5 {
            let ep = episode("u1", &format!("standup note number {i} about atlas"), Some("s1"));
            episode_ids.push(ep.id.clone());
            store.add_memory(&ep).unwrap();
        }
        let llm = MockLlm::with_responses(vec![format!(
            "{{\"semantic_facts\": [{{\"content\": \"the team ships atlas weekly\", \
              \"importance\": 0.8, \"source_episodes\": [\"{}\"]}}]}}",
            episode_ids[0]
        )]);

        let report = run_distillation(&store, &index, &llm, &embedder, &config(5), "u1", None)
            .await
            .unwrap();
        assert!(!report.skipped);
        assert_eq!(report.semantic_created, 1);
        assert_eq!(report.errors, 0);

        let semantic = store
            .list_memories(&MemoryQuery {
                user_id: Some("u1".into()),
                memory_type: Some(MemoryType::Semantic),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(semantic.len(), 1);
        let fact = &semantic[0];
        assert_eq!(fact.layer, MemoryLayer::Lml);
        assert_eq!(fact.strength, 0.8);
        assert_eq!(fact.source_memories, vec![episode_ids[0].clone()]);
        assert_eq!(fact.metadata["is_distilled"], true);
    }

    #[tokio::test]
    async fn invalid_json_is_a_soft_error() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(64);
        let embedder = SimpleEmbedder::new(64);
        for i in 0..5 {
            store
                .add_memory(&episode("u1", &format!("note {i}"), None))
                .unwrap();
        }
        let llm = MockLlm::with_responses(vec!["the model rambled instead of JSON".into()]);

        let report = run_distillation(&store, &index, &llm, &embedder, &config(5), "u1", None)
            .await
            .unwrap();
        assert_eq!(report.semantic_created, 0);
        assert_eq!(report.errors, 0, "invalid JSON is soft, not an error");
    }

    #[tokio::test]
    async fn duplicate_facts_count_as_deduplicated() {
        let store = Store::open_in_memory().unwrap();
        let index = FlatIndex::in_memory(64);
        let embedder = SimpleEmbedder::new(64);
        // An existing semantic memory identical to what the LLM will emit.
        let mut known = MemoryRecord::new("the team ships atlas weekly", "u1");
        known.memory_type = MemoryType::Semantic;
        known.embedding = Some(embedder.embed(&known.content).await.unwrap());
        store.add_memory(&known).unwrap();
        index
            .insert(
                &known.id,
                known.embedding.clone().unwrap(),
                PointPayload {
                    user_id: "u1".into(),
                    memory_type: Some(MemoryType::Semantic),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        for i in 0..5 {
            store
                .add_memory(&episode("u1", &format!("standup {i}"), None))
                .unwrap();
        }
        let llm = MockLlm::with_responses(vec![
            "{\"semantic_facts\": [{\"content\": \"the team ships atlas weekly\"}]}".into(),
        ]);

        let report = run_distillation(&store, &index, &llm, &embedder, &config(5), "u1", None)
            .await
            .unwrap();
        assert_eq!(report.semantic_created, 0);
        assert_eq!(report.semantic_deduplicated, 1);
    }

    #[test]
    fn scene_grouping_splits_large_groups() {
        let cfg = DistillationConfig {
            batch_size: 2,
            ..Default::default()
        };
        let episodes: Vec<MemoryRecord> = (0..5)
            .map(|i| episode("u1", &format!("e{i}"), Some("s1")))
            .collect();
        let batches = group_episodes(&cfg, &episodes);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 2));
    }
}
