//! Daily digest generation: top unresolved conflicts, consolidations
//! awaiting review, and recent high-strength scene highlights.

use engram_domain::error::Result;
use engram_domain::staging::{CommitStatus, StashResolution};
use engram_store::Store;

const DIGEST_ITEM_LIMIT: usize = 5;

/// Compute and upsert the digest for `(user_id, date)`; returns the
/// payload that was stored.
pub fn build_daily_digest(
    store: &Store,
    user_id: &str,
    digest_date: &str,
) -> Result<serde_json::Value> {
    let conflicts = store.list_conflict_stash(
        Some(user_id),
        Some(StashResolution::Unresolved),
        DIGEST_ITEM_LIMIT,
    )?;
    let top_conflicts: Vec<serde_json::Value> = conflicts
        .iter()
        .map(|stash| {
            serde_json::json!({
                "stash_id": stash.id,
                "conflict_key": stash.conflict_key,
                "created_at": stash.created_at,
            })
        })
        .collect();

    let pending = store.list_commits(
        Some(user_id),
        None,
        Some(CommitStatus::Pending),
        DIGEST_ITEM_LIMIT,
    )?;
    let proposed_consolidations: Vec<serde_json::Value> = pending
        .iter()
        .map(|commit| {
            serde_json::json!({
                "commit_id": commit.id,
                "agent_id": commit.agent_id,
                "risk_score": commit.checks.risk_score,
                "created_at": commit.created_at,
            })
        })
        .collect();

    let mut scenes = store.list_scenes(Some(user_id), None, DIGEST_ITEM_LIMIT * 4)?;
    scenes.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let scene_highlights: Vec<serde_json::Value> = scenes
        .iter()
        .take(DIGEST_ITEM_LIMIT)
        .map(|scene| {
            serde_json::json!({
                "scene_id": scene.id,
                "title": scene.title,
                "summary": scene.summary,
                "strength": scene.strength,
                "start_time": scene.start_time,
            })
        })
        .collect();

    let payload = serde_json::json!({
        "top_conflicts": top_conflicts,
        "proposed_consolidations": proposed_consolidations,
        "scene_highlights": scene_highlights,
    });
    store.upsert_daily_digest(user_id, digest_date, &payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_domain::staging::ConflictStash;

    #[test]
    fn digest_upserts_and_surfaces_conflicts() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_conflict_stash(&ConflictStash {
                id: "stash-1".into(),
                user_id: "u1".into(),
                conflict_key: "identity.name".into(),
                existing: serde_json::json!({}),
                proposed: serde_json::json!({}),
                resolution: StashResolution::Unresolved,
                source_commit_id: None,
                created_at: Utc::now(),
                resolved_at: None,
            })
            .unwrap();

        let payload = build_daily_digest(&store, "u1", "2026-08-01").unwrap();
        assert_eq!(payload["top_conflicts"][0]["stash_id"], "stash-1");

        let stored = store.get_daily_digest("u1", "2026-08-01").unwrap().unwrap();
        assert_eq!(stored.payload["top_conflicts"][0]["conflict_key"], "identity.name");
        // Resolved conflicts drop out on the next build.
        store
            .resolve_conflict_stash("stash-1", StashResolution::KeepExisting)
            .unwrap();
        let payload = build_daily_digest(&store, "u1", "2026-08-01").unwrap();
        assert!(payload["top_conflicts"].as_array().unwrap().is_empty());
    }
}
