//! Reference-manager helpers over the store's refcount tables.
//!
//! Strong refs have no TTL and protect a memory from decay outright;
//! weak refs default to a 14-day TTL and merely dampen eviction.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use engram_domain::config::DecayConfig;
use engram_domain::error::Result;
use engram_store::refcounts::{RefType, Refcount};
use engram_store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeResult {
    pub memory_id: String,
    pub subscriber: String,
    pub ref_type: RefType,
    pub added: bool,
    pub refcount: Refcount,
}

/// Add a subscriber ref; idempotent per `(memory, subscriber, ref_type)`.
pub fn subscribe(
    store: &Store,
    config: &DecayConfig,
    memory_id: &str,
    subscriber: &str,
    ref_type: RefType,
) -> Result<SubscribeResult> {
    let expires_at: Option<DateTime<Utc>> = match ref_type {
        RefType::Strong => None,
        RefType::Weak => Some(Utc::now() + Duration::days(config.weak_ref_ttl_days)),
    };
    let added = store.add_subscriber(memory_id, subscriber, ref_type, expires_at)?;
    Ok(SubscribeResult {
        memory_id: memory_id.to_string(),
        subscriber: subscriber.to_string(),
        ref_type,
        added,
        refcount: store.get_refcount(memory_id)?,
    })
}

/// Remove a subscriber ref; idempotent.
pub fn unsubscribe(
    store: &Store,
    memory_id: &str,
    subscriber: &str,
    ref_type: RefType,
) -> Result<SubscribeResult> {
    let removed = store.remove_subscriber(memory_id, subscriber, ref_type)?;
    Ok(SubscribeResult {
        memory_id: memory_id.to_string(),
        subscriber: subscriber.to_string(),
        ref_type,
        added: removed,
        refcount: store.get_refcount(memory_id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_refs_get_a_ttl() {
        let store = Store::open_in_memory().unwrap();
        let config = DecayConfig::default();

        let result = subscribe(&store, &config, "m1", "agent-a", RefType::Weak).unwrap();
        assert!(result.added);
        assert_eq!(result.refcount.weak_count, 1);

        let rows = store.list_subscribers("m1").unwrap();
        assert!(rows[0].expires_at.is_some());

        let strong = subscribe(&store, &config, "m1", "agent-a", RefType::Strong).unwrap();
        assert_eq!(strong.refcount.strong_count, 1);
        let rows = store.list_subscribers("m1").unwrap();
        assert!(rows.iter().any(|r| r.expires_at.is_none()));
    }

    #[test]
    fn unsubscribe_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let config = DecayConfig::default();
        subscribe(&store, &config, "m1", "agent-a", RefType::Strong).unwrap();
        let removed = unsubscribe(&store, "m1", "agent-a", RefType::Strong).unwrap();
        assert!(removed.added);
        assert_eq!(removed.refcount.strong_count, 0);
    }
}
