//! Intersection promotion: semantic hits that also appear in matching
//! episodic scenes get a calibrated composite-score boost.

use std::collections::HashMap;

use engram_domain::scene::SceneHit;

use super::MemoryHit;

/// Apply the episodic intersection boost in place, then re-rank by
/// composite score. The sort is stable, so items that received no boost
/// keep their original relative order.
pub fn intersection_promote(
    hits: &mut Vec<MemoryHit>,
    scenes: &[SceneHit],
    boost_weight: f64,
    max_boost: f64,
) {
    // Accumulated scene signal per member memory id.
    let mut signal: HashMap<&str, f64> = HashMap::new();
    for scene in scenes {
        let score = scene.search_score.max(0.0);
        for memory_id in &scene.scene.memory_ids {
            *signal.entry(memory_id.as_str()).or_insert(0.0) += score.max(0.1);
        }
    }

    for hit in hits.iter_mut() {
        hit.base_composite_score = hit.composite_score;
        if let Some(scene_signal) = signal.get(hit.id.as_str()) {
            let boost = (boost_weight * scene_signal).min(max_boost);
            hit.episodic_match = true;
            hit.intersection_boost = boost;
            hit.composite_score += boost;
        }
    }

    hits.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_domain::scene::Scene;

    fn hit(id: &str, score: f64) -> MemoryHit {
        MemoryHit {
            id: id.into(),
            memory: format!("content of {id}"),
            score,
            composite_score: score,
            base_composite_score: score,
            intersection_boost: 0.0,
            episodic_match: false,
            namespace: "default".into(),
            confidentiality_scope: Default::default(),
            importance: 0.5,
            memory_type: Default::default(),
            layer: Default::default(),
            categories: vec![],
            created_at: Utc::now(),
            masked: false,
        }
    }

    fn scene_hit(memory_ids: &[&str], score: f64) -> SceneHit {
        SceneHit {
            scene: Scene {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: "u1".into(),
                title: None,
                summary: None,
                topic: None,
                location: None,
                participants: vec![],
                memory_ids: memory_ids.iter().map(|s| s.to_string()).collect(),
                start_time: Utc::now(),
                end_time: None,
                embedding: None,
                strength: 1.0,
                access_count: 0,
                namespace: "default".into(),
                tombstone: false,
            },
            search_score: score,
        }
    }

    #[test]
    fn boosted_item_overtakes_when_signal_is_strong() {
        let mut hits = vec![hit("a", 0.8), hit("b", 0.7)];
        let scenes = vec![scene_hit(&["b"], 1.0)];
        intersection_promote(&mut hits, &scenes, 0.22, 0.35);

        assert_eq!(hits[0].id, "b");
        assert!(hits[0].episodic_match);
        assert!((hits[0].intersection_boost - 0.22).abs() < 1e-9);
        assert!((hits[0].base_composite_score - 0.7).abs() < 1e-9);
        assert!(!hits[1].episodic_match);
        assert_eq!(hits[1].intersection_boost, 0.0);
    }

    #[test]
    fn boost_is_capped() {
        let mut hits = vec![hit("a", 0.5)];
        // Three strong scenes all containing "a" — raw boost would be 0.66.
        let scenes = vec![
            scene_hit(&["a"], 1.0),
            scene_hit(&["a"], 1.0),
            scene_hit(&["a"], 1.0),
        ];
        intersection_promote(&mut hits, &scenes, 0.22, 0.35);
        assert!((hits[0].intersection_boost - 0.35).abs() < 1e-9);
    }

    #[test]
    fn no_scenes_means_no_boost_and_stable_order() {
        let mut hits = vec![hit("a", 0.9), hit("b", 0.9), hit("c", 0.2)];
        intersection_promote(&mut hits, &[], 0.22, 0.35);
        assert_eq!(
            hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert!(hits.iter().all(|h| !h.episodic_match));
    }
}
