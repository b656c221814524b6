//! Memory refcounts and subscriber rows.
//!
//! Strong refs protect a memory from decay-driven forgetting outright;
//! weak refs raise its effective forget threshold and expire (default TTL
//! 14 days). Subscriber add/remove is idempotent per
//! `(memory, subscriber, ref_type)`.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::error::Result;
use crate::{dt_to_text, opt_dt_to_text, text_to_opt_dt, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Strong,
    Weak,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::Strong => "strong",
            RefType::Weak => "weak",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Refcount {
    pub strong_count: i64,
    pub weak_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberRow {
    pub memory_id: String,
    pub subscriber: String,
    pub ref_type: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Store {
    pub fn get_refcount(&self, memory_id: &str) -> Result<Refcount> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT strong_count, weak_count FROM memory_refcounts WHERE memory_id = ?1",
                    params![memory_id],
                    |row| {
                        Ok(Refcount {
                            strong_count: row.get(0)?,
                            weak_count: row.get(1)?,
                        })
                    },
                )
                .unwrap_or_default();
            Ok(row)
        })
    }

    /// Add a subscriber ref. Returns true when a new row was created (and
    /// the count incremented); re-adding the same ref is a no-op.
    pub fn add_subscriber(
        &self,
        memory_id: &str,
        subscriber: &str,
        ref_type: RefType,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.with_tx(|tx| {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO memory_subscribers
                     (id, memory_id, subscriber, ref_type, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    memory_id,
                    subscriber,
                    ref_type.as_str(),
                    opt_dt_to_text(expires_at),
                ],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT OR IGNORE INTO memory_refcounts (memory_id, strong_count, weak_count)
                 VALUES (?1, 0, 0)",
                params![memory_id],
            )?;
            let column = count_column(ref_type);
            tx.execute(
                &format!(
                    "UPDATE memory_refcounts
                     SET {column} = {column} + 1, updated_at = ?2 WHERE memory_id = ?1"
                ),
                params![memory_id, dt_to_text(Utc::now())],
            )?;
            Ok(true)
        })
    }

    /// Remove a subscriber ref; idempotent.
    pub fn remove_subscriber(
        &self,
        memory_id: &str,
        subscriber: &str,
        ref_type: RefType,
    ) -> Result<bool> {
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM memory_subscribers
                 WHERE memory_id = ?1 AND subscriber = ?2 AND ref_type = ?3",
                params![memory_id, subscriber, ref_type.as_str()],
            )?;
            if removed == 0 {
                return Ok(false);
            }
            let column = count_column(ref_type);
            tx.execute(
                &format!(
                    "UPDATE memory_refcounts
                     SET {column} = MAX(0, {column} - 1), updated_at = ?2 WHERE memory_id = ?1"
                ),
                params![memory_id, dt_to_text(Utc::now())],
            )?;
            Ok(true)
        })
    }

    pub fn list_subscribers(&self, memory_id: &str) -> Result<Vec<SubscriberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id, subscriber, ref_type, expires_at
                 FROM memory_subscribers WHERE memory_id = ?1",
            )?;
            let rows = stmt.query_map(params![memory_id], |row| {
                Ok(SubscriberRow {
                    memory_id: row.get(0)?,
                    subscriber: row.get(1)?,
                    ref_type: row.get(2)?,
                    expires_at: text_to_opt_dt(row.get(3)?),
                })
            })?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Delete subscriber rows whose TTL has passed, decrementing refcounts
    /// accordingly. Returns the number of rows removed.
    pub fn cleanup_stale_subscribers(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_tx(|tx| {
            let now_text = dt_to_text(now);
            let mut stmt = tx.prepare(
                "SELECT memory_id, ref_type FROM memory_subscribers
                 WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            )?;
            let stale: Vec<(String, String)> = stmt
                .query_map(params![now_text], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?;
            drop(stmt);

            for (memory_id, ref_type) in &stale {
                let column = if ref_type == "strong" {
                    "strong_count"
                } else {
                    "weak_count"
                };
                tx.execute(
                    &format!(
                        "UPDATE memory_refcounts
                         SET {column} = MAX(0, {column} - 1), updated_at = ?2
                         WHERE memory_id = ?1"
                    ),
                    params![memory_id, now_text],
                )?;
            }
            tx.execute(
                "DELETE FROM memory_subscribers
                 WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now_text],
            )?;
            Ok(stale.len())
        })
    }
}

fn count_column(ref_type: RefType) -> &'static str {
    match ref_type {
        RefType::Strong => "strong_count",
        RefType::Weak => "weak_count",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn add_is_idempotent_per_triple() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.add_subscriber("m1", "agent-a", RefType::Strong, None).unwrap());
        assert!(!store.add_subscriber("m1", "agent-a", RefType::Strong, None).unwrap());
        assert!(store.add_subscriber("m1", "agent-a", RefType::Weak, None).unwrap());

        let rc = store.get_refcount("m1").unwrap();
        assert_eq!((rc.strong_count, rc.weak_count), (1, 1));
    }

    #[test]
    fn remove_decrements_and_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.add_subscriber("m1", "a", RefType::Strong, None).unwrap();
        assert!(store.remove_subscriber("m1", "a", RefType::Strong).unwrap());
        assert!(!store.remove_subscriber("m1", "a", RefType::Strong).unwrap());
        assert_eq!(store.get_refcount("m1").unwrap().strong_count, 0);
    }

    #[test]
    fn stale_cleanup_honors_ttl() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .add_subscriber("m1", "a", RefType::Weak, Some(now - Duration::days(1)))
            .unwrap();
        store
            .add_subscriber("m1", "b", RefType::Weak, Some(now + Duration::days(1)))
            .unwrap();
        store.add_subscriber("m1", "c", RefType::Strong, None).unwrap();

        let removed = store.cleanup_stale_subscribers(now).unwrap();
        assert_eq!(removed, 1);
        let rc = store.get_refcount("m1").unwrap();
        assert_eq!((rc.strong_count, rc.weak_count), (1, 1));
        assert_eq!(store.list_subscribers("m1").unwrap().len(), 2);
    }

    #[test]
    fn missing_refcount_row_reads_as_zero() {
        let store = Store::open_in_memory().unwrap();
        let rc = store.get_refcount("nope").unwrap();
        assert_eq!((rc.strong_count, rc.weak_count), (0, 0));
    }
}
