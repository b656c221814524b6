//! Dual retrieval: semantic vector search intersected with episodic
//! scene search, re-ranked, masked, and packed into a bounded context
//! packet with an auditable trace.

pub mod packer;
pub mod rerank;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use engram_domain::config::Config;
use engram_domain::error::Result;
use engram_domain::memory::{ConfidentialityScope, MemoryLayer, MemoryType};
use engram_domain::scene::SceneHit;
use engram_index::{SearchFilters, VectorIndex};
use engram_providers::Embedder;
use engram_store::refcounts::RefType;
use engram_store::Store;

use crate::decay::boost_access;
use crate::policy::{namespace_visible, scope_visible, RedactedHit};
use crate::scene;
use crate::sessions::RequestContext;

pub use packer::ContextPacket;

/// A fully visible search hit.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryHit {
    pub id: String,
    /// The memory text (wire name `memory`).
    pub memory: String,
    /// Raw vector similarity.
    pub score: f64,
    /// Final ranking score after intersection promotion.
    pub composite_score: f64,
    pub base_composite_score: f64,
    pub intersection_boost: f64,
    pub episodic_match: bool,
    pub namespace: String,
    pub confidentiality_scope: ConfidentialityScope,
    pub importance: f64,
    pub memory_type: MemoryType,
    pub layer: MemoryLayer,
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub masked: bool,
}

/// Either a visible hit or the redacted shape — the type system keeps
/// restricted content out of masked results.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SearchResultItem {
    Visible(MemoryHit),
    Redacted(RedactedHit),
}

impl SearchResultItem {
    pub fn id(&self) -> &str {
        match self {
            SearchResultItem::Visible(hit) => &hit.id,
            SearchResultItem::Redacted(hit) => &hit.id,
        }
    }

    pub fn is_masked(&self) -> bool {
        matches!(self, SearchResultItem::Redacted(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneHitSummary {
    pub scene_id: String,
    pub summary: Option<String>,
    pub memory_ids: Vec<String>,
    pub search_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalTrace {
    pub ranking_version: &'static str,
    pub strategy: &'static str,
    pub semantic_candidates: usize,
    pub scene_candidates: usize,
    pub intersection_candidates: usize,
    pub boosted_candidates: usize,
    pub boost_weight: f64,
    pub boost_cap: f64,
    pub masked_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub count: usize,
    pub context_packet: ContextPacket,
    pub scene_hits: Vec<SceneHitSummary>,
    pub retrieval_trace: RetrievalTrace,
}

/// TTL for the weak retrieval refs recorded on behalf of agent readers.
const RETRIEVAL_REF_TTL_DAYS: i64 = 14;

pub async fn dual_search(
    store: &Store,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    config: &Config,
    ctx: &RequestContext,
    query: &str,
    user_id: &str,
    limit: usize,
    categories: Option<&[String]>,
) -> Result<SearchResponse> {
    let limit = limit.max(1);
    let allowed_scopes = ctx.allowed_scopes();
    let allowed_namespaces = ctx.allowed_namespaces();

    // Semantic candidate set: 2·limit, minimum 10.
    let query_embedding = embedder.embed(query).await?;
    let candidate_count = (limit * 2).max(10);
    let scored = index
        .search(
            &query_embedding,
            candidate_count,
            &SearchFilters::for_user(user_id),
        )
        .await?;

    let ids: Vec<String> = scored.iter().map(|point| point.id.clone()).collect();
    let records = store.get_memories_bulk(&ids)?;
    let mut hits: Vec<MemoryHit> = Vec::new();
    for point in &scored {
        let Some(record) = records.iter().find(|m| m.id == point.id) else {
            continue;
        };
        if let Some(wanted) = categories.filter(|c| !c.is_empty()) {
            if !wanted.iter().any(|c| record.categories.contains(c)) {
                continue;
            }
        }
        hits.push(MemoryHit {
            id: record.id.clone(),
            memory: record.content.clone(),
            score: point.score,
            composite_score: point.score,
            base_composite_score: point.score,
            intersection_boost: 0.0,
            episodic_match: false,
            namespace: record.namespace.clone(),
            confidentiality_scope: record.confidentiality_scope,
            importance: record.importance,
            memory_type: record.memory_type,
            layer: record.layer,
            categories: record.categories.clone(),
            created_at: record.created_at,
            masked: false,
        });
    }
    let semantic_candidates = hits.len();

    // Episodic candidate set, namespace-filtered before any use.
    let scene_limit = limit.max(5);
    let mut scenes: Vec<SceneHit> =
        scene::search_scenes(store, embedder, user_id, query, scene_limit).await?;
    scenes.retain(|hit| namespace_visible(&hit.scene.namespace, allowed_namespaces.as_deref()));
    let scene_candidates = scenes.len();

    // Intersection promotion.
    rerank::intersection_promote(
        &mut hits,
        &scenes,
        config.retrieval.intersection_boost_weight,
        config.retrieval.intersection_boost_cap,
    );
    let intersection_candidates = hits.iter().filter(|h| h.episodic_match).count();
    let boosted_candidates = hits.iter().filter(|h| h.intersection_boost > 0.0).count();

    // Scope masking, then namespace masking.
    let mut results: Vec<SearchResultItem> = Vec::new();
    for hit in hits {
        let time = Some(hit.created_at.to_rfc3339());
        if !scope_visible(hit.confidentiality_scope, allowed_scopes.as_deref()) {
            results.push(SearchResultItem::Redacted(RedactedHit::for_scope(
                &hit.id,
                hit.confidentiality_scope,
                time,
                hit.importance,
            )));
        } else if !namespace_visible(&hit.namespace, allowed_namespaces.as_deref()) {
            results.push(SearchResultItem::Redacted(RedactedHit::for_namespace(
                &hit.id,
                time,
                hit.importance,
            )));
        } else {
            results.push(SearchResultItem::Visible(hit));
        }
    }
    results.truncate(limit);
    let masked_count = results.iter().filter(|item| item.is_masked()).count();

    // Access touch + weak retrieval refs for agent readers.
    let now = Utc::now();
    let visible_ids: Vec<String> = results
        .iter()
        .filter(|item| !item.is_masked())
        .map(|item| item.id().to_string())
        .collect();
    for memory_id in &visible_ids {
        if let Some(record) = store.get_memory(memory_id, false)? {
            boost_access(store, &config.decay, &record, now)?;
        }
    }
    if let Some(agent_id) = ctx.agent_id() {
        let expires = now + Duration::days(RETRIEVAL_REF_TTL_DAYS);
        for memory_id in &visible_ids {
            store.add_subscriber(memory_id, agent_id, RefType::Weak, Some(expires))?;
        }
    }

    let context_packet = packer::pack_context(
        query,
        &results,
        &scenes,
        config.retrieval.context_packet_max_tokens,
        config.retrieval.context_packet_max_items.min(limit),
    );

    let scene_hits = scenes
        .iter()
        .take(limit)
        .map(|hit| SceneHitSummary {
            scene_id: hit.scene.id.clone(),
            summary: hit.scene.summary.clone(),
            memory_ids: hit.scene.memory_ids.clone(),
            search_score: hit.search_score,
        })
        .collect();

    Ok(SearchResponse {
        count: results.len(),
        results,
        context_packet,
        scene_hits,
        retrieval_trace: RetrievalTrace {
            ranking_version: "dual_intersection_v2",
            strategy: "semantic_plus_episodic_intersection",
            semantic_candidates,
            scene_candidates,
            intersection_candidates,
            boosted_candidates,
            boost_weight: config.retrieval.intersection_boost_weight,
            boost_cap: config.retrieval.intersection_boost_cap,
            masked_count,
        },
    })
}
