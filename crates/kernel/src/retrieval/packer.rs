//! Deterministic context packet builder.
//!
//! Pure function over the final (already masked) results: assembles up to
//! N snippets under a token budget and reports citations so callers can
//! audit exactly what went into the prompt.

use serde::Serialize;

use engram_domain::scene::SceneHit;

use super::SearchResultItem;

/// Rough chars-per-token ratio used for the budget estimate.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct ContextSnippet {
    pub memory_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Citations {
    pub memory_ids: Vec<String>,
    pub scene_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextPacket {
    pub query: String,
    pub snippets: Vec<ContextSnippet>,
    pub citations: Citations,
    pub token_estimate: usize,
    pub truncated: bool,
}

/// Pack visible results into a bounded context packet. Masked items are
/// skipped entirely — the packet must never carry redacted placeholders
/// into a prompt.
pub fn pack_context(
    query: &str,
    results: &[SearchResultItem],
    scenes: &[SceneHit],
    max_tokens: usize,
    max_items: usize,
) -> ContextPacket {
    let char_budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut snippets: Vec<ContextSnippet> = Vec::new();
    let mut citations = Citations::default();
    let mut used_chars = 0usize;
    let mut truncated = false;

    for item in results {
        let SearchResultItem::Visible(hit) = item else {
            continue;
        };
        if snippets.len() >= max_items {
            truncated = true;
            break;
        }
        let mut text = hit.memory.clone();
        let remaining = char_budget.saturating_sub(used_chars);
        if remaining == 0 {
            truncated = true;
            break;
        }
        if text.len() > remaining {
            text = truncate_on_char_boundary(&text, remaining);
            truncated = true;
        }
        used_chars += text.len();
        citations.memory_ids.push(hit.id.clone());
        snippets.push(ContextSnippet {
            memory_id: hit.id.clone(),
            text,
        });
    }

    for scene in scenes {
        if !citations.scene_ids.contains(&scene.scene.id) {
            citations.scene_ids.push(scene.scene.id.clone());
        }
    }

    ContextPacket {
        query: query.to_string(),
        snippets,
        citations,
        token_estimate: used_chars / CHARS_PER_TOKEN,
        truncated,
    }
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> String {
    let mut end = max_bytes.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RedactedHit;
    use crate::retrieval::MemoryHit;
    use chrono::Utc;
    use engram_domain::memory::ConfidentialityScope;

    fn visible(id: &str, text: &str) -> SearchResultItem {
        SearchResultItem::Visible(MemoryHit {
            id: id.into(),
            memory: text.into(),
            score: 0.9,
            composite_score: 0.9,
            base_composite_score: 0.9,
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
        })
    }

    #[test]
    fn masked_items_never_enter_the_packet() {
        let results = vec![
            visible("a", "visible fact"),
            SearchResultItem::Redacted(RedactedHit::for_scope(
                "b",
                ConfidentialityScope::Finance,
                None,
                0.5,
            )),
        ];
        let packet = pack_context("query", &results, &[], 800, 8);
        assert_eq!(packet.snippets.len(), 1);
        assert_eq!(packet.citations.memory_ids, vec!["a".to_string()]);
        assert!(!packet
            .snippets
            .iter()
            .any(|s| s.text.contains("[REDACTED]")));
    }

    #[test]
    fn token_budget_truncates() {
        let long = "word ".repeat(200);
        let results = vec![visible("a", &long), visible("b", &long)];
        // 50 tokens ≈ 200 chars: the first snippet gets cut, the second
        // never fits.
        let packet = pack_context("query", &results, &[], 50, 8);
        assert!(packet.truncated);
        assert!(packet.token_estimate <= 50);
        assert_eq!(packet.snippets.len(), 1);
    }

    #[test]
    fn item_cap_applies() {
        let results: Vec<SearchResultItem> = (0..10)
            .map(|i| visible(&format!("m{i}"), "short"))
            .collect();
        let packet = pack_context("query", &results, &[], 800, 3);
        assert_eq!(packet.snippets.len(), 3);
        assert!(packet.truncated);
    }

    #[test]
    fn empty_results_pack_cleanly() {
        let packet = pack_context("query", &[], &[], 800, 8);
        assert!(packet.snippets.is_empty());
        assert_eq!(packet.token_estimate, 0);
        assert!(!packet.truncated);
    }
}
