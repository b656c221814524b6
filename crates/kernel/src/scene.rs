//! Episodic scene tracking: boundary detection, incremental centroid
//! maintenance, stale auto-close with optional LLM summarization, and
//! scene search.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;

use engram_domain::config::SceneConfig;
use engram_domain::error::Result;
use engram_domain::memory::MemoryRecord;
use engram_domain::scene::{Scene, SceneHit};
use engram_index::cosine_similarity;
use engram_providers::{Embedder, Llm};
use engram_store::{SceneField, Store};

/// Why a boundary decision came out the way it did.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDecision {
    pub new_scene: bool,
    pub reason: &'static str,
    pub detected_location: Option<String>,
    pub topic_similarity: Option<f64>,
}

fn location_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:at|in|from|near|visiting|located in|based in|went to|going to|arrived at)\s+([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)*)",
        )
        .expect("static regex")
    })
}

/// Extract a location mention ("at/in/from <Capitalized Phrase>").
pub fn detect_location(content: &str) -> Option<String> {
    let caps = location_regex().captures(content)?;
    let location = caps[1].trim();
    (location.len() > 2).then(|| location.to_string())
}

/// Decide whether this memory starts a new scene or continues the
/// current one. Checks run in fixed order: no scene, time gap, size cap,
/// topic shift, location change.
pub fn detect_boundary(
    config: &SceneConfig,
    current: Option<&Scene>,
    content: &str,
    timestamp: DateTime<Utc>,
    embedding: Option<&[f32]>,
) -> SceneDecision {
    let detected_location = detect_location(content);

    let Some(scene) = current else {
        return SceneDecision {
            new_scene: true,
            reason: "no_scene",
            detected_location,
            topic_similarity: None,
        };
    };

    let gap_minutes = (timestamp - scene.last_activity()).num_seconds() as f64 / 60.0;
    if gap_minutes > config.scene_time_gap_minutes as f64 {
        return SceneDecision {
            new_scene: true,
            reason: "time_gap",
            detected_location,
            topic_similarity: None,
        };
    }

    if scene.memory_ids.len() >= config.max_scene_memories {
        return SceneDecision {
            new_scene: true,
            reason: "max_memories",
            detected_location,
            topic_similarity: None,
        };
    }

    let mut topic_similarity = None;
    if let (Some(embedding), Some(centroid)) = (embedding, scene.embedding.as_deref()) {
        let similarity = cosine_similarity(embedding, centroid);
        topic_similarity = Some(similarity);
        if similarity < config.scene_topic_threshold {
            return SceneDecision {
                new_scene: true,
                reason: "topic_shift",
                detected_location,
                topic_similarity,
            };
        }
    }

    if let (Some(scene_location), Some(new_location)) =
        (scene.location.as_deref(), detected_location.as_deref())
    {
        if !scene_location.eq_ignore_ascii_case(new_location) {
            return SceneDecision {
                new_scene: true,
                reason: "location_change",
                detected_location,
                topic_similarity,
            };
        }
    }

    SceneDecision {
        new_scene: false,
        reason: "continues",
        detected_location,
        topic_similarity,
    }
}

/// Route a freshly added memory into its scene: close stale scenes,
/// detect the boundary, then create or extend. Returns the scene id the
/// memory landed in.
pub async fn track_memory(
    store: &Store,
    llm: &dyn Llm,
    config: &SceneConfig,
    memory: &MemoryRecord,
) -> Result<Option<String>> {
    if !config.enable_scenes {
        return Ok(None);
    }

    auto_close_stale(store, llm, config, &memory.user_id, memory.created_at).await?;

    let current = store.get_open_scene(&memory.user_id)?;
    let decision = detect_boundary(
        config,
        current.as_ref(),
        &memory.content,
        memory.created_at,
        memory.embedding.as_deref(),
    );

    // A "continues" decision is only ever produced against an open scene.
    let continuing = match current {
        Some(scene) if !decision.new_scene => Some(scene),
        Some(scene) => {
            close_scene(store, llm, config, &scene.id, memory.created_at).await?;
            None
        }
        None => None,
    };

    let scene_id = if let Some(scene) = continuing {
        let position = scene.memory_ids.len();
        let mut memory_ids = scene.memory_ids.clone();
        memory_ids.push(memory.id.clone());

        let mut fields = vec![SceneField::MemoryIds(memory_ids)];
        // Incremental centroid: old·n/(n+1) + new/(n+1).
        if let (Some(centroid), Some(embedding)) = (&scene.embedding, &memory.embedding) {
            if centroid.len() == embedding.len() {
                let n = position.max(1) as f32;
                let inv = 1.0 / (n + 1.0);
                let updated: Vec<f32> = centroid
                    .iter()
                    .zip(embedding.iter())
                    .map(|(old, new)| old * n * inv + new * inv)
                    .collect();
                fields.push(SceneField::Embedding(Some(updated)));
            }
        }
        if scene.location.is_none() {
            if let Some(location) = decision.detected_location.clone() {
                fields.push(SceneField::Location(Some(location)));
            }
        }
        store.update_scene(&scene.id, &fields)?;
        store.add_scene_memory(&scene.id, &memory.id, position)?;
        scene.id
    } else {
        let scene = Scene {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: memory.user_id.clone(),
            title: None,
            summary: None,
            topic: None,
            location: decision.detected_location.clone(),
            participants: Vec::new(),
            memory_ids: vec![memory.id.clone()],
            start_time: memory.created_at,
            end_time: None,
            embedding: memory.embedding.clone(),
            strength: 1.0,
            access_count: 0,
            namespace: memory.namespace.clone(),
            tombstone: false,
        };
        store.add_scene(&scene)?;
        store.add_scene_memory(&scene.id, &memory.id, 0)?;
        tracing::debug!(
            scene_id = %scene.id,
            reason = decision.reason,
            "started new scene"
        );
        scene.id
    };

    Ok(Some(scene_id))
}

/// Close a scene: stamp `end_time` and, when enabled, summarize its
/// member memories with the LLM (bounded by `max_scene_memories`).
pub async fn close_scene(
    store: &Store,
    llm: &dyn Llm,
    config: &SceneConfig,
    scene_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(scene) = store.get_scene(scene_id)? else {
        return Ok(());
    };

    let mut fields = Vec::new();
    if scene.end_time.is_none() {
        fields.push(SceneField::EndTime(Some(now)));
    }

    if config.use_llm_summarization {
        let members = store.get_memories_bulk(&scene.memory_ids)?;
        let texts: Vec<&str> = members
            .iter()
            .take(config.max_scene_memories)
            .map(|m| m.content.as_str())
            .collect();
        if !texts.is_empty() {
            let numbered = texts
                .iter()
                .enumerate()
                .map(|(i, t)| format!("{}. {t}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "Summarize this sequence of memories into a concise episodic narrative \
                 (2-4 sentences). Focus on what happened, who was involved, and key \
                 outcomes.\n\nMemories:\n{numbered}\n\nSummary:"
            );
            match llm.generate(&prompt).await {
                Ok(summary) if !summary.trim().is_empty() => {
                    let summary = summary.trim().to_string();
                    let title = summary
                        .split('.')
                        .next()
                        .unwrap_or(&summary)
                        .chars()
                        .take(120)
                        .collect::<String>();
                    fields.push(SceneField::Summary(Some(summary)));
                    fields.push(SceneField::Title(Some(title)));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "scene summarization failed"),
            }
        }
    }

    if !fields.is_empty() {
        store.update_scene(scene_id, &fields)?;
    }
    Ok(())
}

/// Close the user's open scene when it has been idle past the auto-close
/// threshold.
pub async fn auto_close_stale(
    store: &Store,
    llm: &dyn Llm,
    config: &SceneConfig,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let Some(open) = store.get_open_scene(user_id)? else {
        return Ok(Vec::new());
    };
    let idle = now - open.last_activity();
    if idle > Duration::minutes(config.auto_close_inactive_minutes) {
        close_scene(store, llm, config, &open.id, now).await?;
        return Ok(vec![open.id]);
    }
    Ok(Vec::new())
}

/// Search scenes by embedding similarity against the centroid, falling
/// back to keyword overlap for scenes without one.
pub async fn search_scenes(
    store: &Store,
    embedder: &dyn Embedder,
    user_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<SceneHit>> {
    let candidate_limit = (limit * 3).min(150).max(1);
    let candidates = store.list_scenes(Some(user_id), None, candidate_limit)?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let query_embedding = embedder.embed(query).await?;
    let query_words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();

    let mut scored: Vec<SceneHit> = Vec::new();
    for scene in candidates {
        let score = match &scene.embedding {
            Some(centroid) => cosine_similarity(&query_embedding, centroid),
            None => {
                let text = format!(
                    "{} {} {}",
                    scene.title.as_deref().unwrap_or(""),
                    scene.summary.as_deref().unwrap_or(""),
                    scene.topic.as_deref().unwrap_or("")
                )
                .to_lowercase();
                query_words.iter().filter(|w| text.contains(w.as_str())).count() as f64 * 0.1
            }
        };
        if score > 0.0 {
            scored.push(SceneHit {
                scene,
                search_score: (score * 10_000.0).round() / 10_000.0,
            });
        }
    }
    scored.sort_by(|a, b| {
        b.search_score
            .partial_cmp(&a.search_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_providers::{Embedder as _, MockLlm, SimpleEmbedder};

    fn config() -> SceneConfig {
        SceneConfig::default()
    }

    fn scene_with(memory_ids: usize, embedding: Option<Vec<f32>>, location: Option<&str>) -> Scene {
        Scene {
            id: "s1".into(),
            user_id: "u1".into(),
            title: None,
            summary: None,
            topic: None,
            location: location.map(String::from),
            participants: vec![],
            memory_ids: (0..memory_ids).map(|i| format!("m{i}")).collect(),
            start_time: Utc::now() - Duration::minutes(5),
            end_time: None,
            embedding,
            strength: 1.0,
            access_count: 0,
            namespace: "default".into(),
            tombstone: false,
        }
    }

    #[test]
    fn location_pattern_requires_capitalized_phrase() {
        assert_eq!(detect_location("dinner at Blue Hill tonight"), Some("Blue Hill".into()));
        assert_eq!(detect_location("met her in Paris"), Some("Paris".into()));
        assert_eq!(detect_location("sitting at home"), None);
    }

    #[test]
    fn boundary_reasons_fire_in_order() {
        let cfg = config();
        let now = Utc::now();

        let none = detect_boundary(&cfg, None, "hello", now, None);
        assert!(none.new_scene);
        assert_eq!(none.reason, "no_scene");

        let stale = scene_with(3, None, None);
        let late = now + Duration::minutes(45);
        let gap = detect_boundary(&cfg, Some(&stale), "hello", late, None);
        assert_eq!(gap.reason, "time_gap");

        let full = scene_with(cfg.max_scene_memories, None, None);
        let cap = detect_boundary(&cfg, Some(&full), "hello", now, None);
        assert_eq!(cap.reason, "max_memories");

        let themed = scene_with(3, Some(vec![1.0, 0.0]), None);
        let shift = detect_boundary(&cfg, Some(&themed), "hello", now, Some(&[0.0, 1.0]));
        assert_eq!(shift.reason, "topic_shift");
        assert!(shift.topic_similarity.unwrap() < cfg.scene_topic_threshold);

        let located = scene_with(3, None, Some("Paris"));
        let moved = detect_boundary(&cfg, Some(&located), "arrived at Berlin", now, None);
        assert_eq!(moved.reason, "location_change");

        let same = detect_boundary(&cfg, Some(&located), "still in Paris", now, None);
        assert!(!same.new_scene);
    }

    #[tokio::test]
    async fn tracking_builds_and_extends_scenes() {
        let store = Store::open_in_memory().unwrap();
        let llm = MockLlm::new();
        let embedder = SimpleEmbedder::new(64);
        let cfg = config();

        let mut first = MemoryRecord::new("kickoff meeting notes about atlas", "u1");
        first.embedding = Some(embedder.embed(&first.content).await.unwrap());
        store.add_memory(&first).unwrap();
        let scene_a = track_memory(&store, &llm, &cfg, &first).await.unwrap().unwrap();

        let mut second = MemoryRecord::new("more kickoff meeting notes about atlas", "u1");
        second.embedding = Some(embedder.embed(&second.content).await.unwrap());
        store.add_memory(&second).unwrap();
        let scene_b = track_memory(&store, &llm, &cfg, &second).await.unwrap().unwrap();
        assert_eq!(scene_a, scene_b, "same topic continues the scene");

        let scene = store.get_scene(&scene_a).unwrap().unwrap();
        assert_eq!(scene.memory_ids.len(), 2);
        assert!(scene.is_open());
    }

    #[tokio::test]
    async fn topic_shift_starts_new_scene() {
        let store = Store::open_in_memory().unwrap();
        let llm = MockLlm::with_responses(vec!["Planning happened.".into()]);
        let embedder = SimpleEmbedder::new(64);
        let cfg = config();

        let mut first = MemoryRecord::new("sprint planning backlog grooming estimates", "u1");
        first.embedding = Some(embedder.embed(&first.content).await.unwrap());
        store.add_memory(&first).unwrap();
        let scene_a = track_memory(&store, &llm, &cfg, &first).await.unwrap().unwrap();

        let mut second = MemoryRecord::new("grandma birthday cake candles party", "u1");
        second.embedding = Some(embedder.embed(&second.content).await.unwrap());
        store.add_memory(&second).unwrap();
        let scene_b = track_memory(&store, &llm, &cfg, &second).await.unwrap().unwrap();
        assert_ne!(scene_a, scene_b);

        // The displaced scene was closed and summarized.
        let closed = store.get_scene(&scene_a).unwrap().unwrap();
        assert!(!closed.is_open());
        assert_eq!(closed.summary.as_deref(), Some("Planning happened."));
    }

    #[tokio::test]
    async fn scene_search_ranks_by_centroid_similarity() {
        let store = Store::open_in_memory().unwrap();
        let llm = MockLlm::new();
        let embedder = SimpleEmbedder::new(64);
        let cfg = config();

        let mut work = MemoryRecord::new("atlas deployment pipeline review", "u1");
        work.embedding = Some(embedder.embed(&work.content).await.unwrap());
        store.add_memory(&work).unwrap();
        track_memory(&store, &llm, &cfg, &work).await.unwrap();

        let hits = search_scenes(&store, &embedder, "u1", "atlas deployment", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].search_score > 0.3);
        assert!(hits[0].scene.memory_ids.contains(&work.id));
    }
}
