//! Memory event history, decay runs and distillation bookkeeping.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::error::Result;
use crate::{text_to_dt, to_json_text, Store};

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEvent {
    pub memory_id: String,
    pub event: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DistillationRunCounts {
    pub episodes_sampled: usize,
    pub semantic_created: usize,
    pub semantic_deduplicated: usize,
    pub errors: usize,
}

impl Store {
    /// Append an event to a memory's history log.
    pub fn log_event(&self, memory_id: &str, event: &str, details: serde_json::Value) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memory_history (memory_id, event, details) VALUES (?1, ?2, ?3)",
                params![memory_id, event, to_json_text(&details)],
            )?;
            Ok(())
        })
    }

    pub fn get_history(&self, memory_id: &str) -> Result<Vec<HistoryEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id, event, details, timestamp
                 FROM memory_history WHERE memory_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![memory_id], |row| {
                Ok(HistoryEvent {
                    memory_id: row.get(0)?,
                    event: row.get(1)?,
                    details: row
                        .get::<_, Option<String>>(2)?
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
                    timestamp: text_to_dt(row.get(3)?),
                })
            })?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn log_decay_run(&self, decayed: usize, forgotten: usize, promoted: usize) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO decay_log (memories_decayed, memories_forgotten, memories_promoted)
                 VALUES (?1, ?2, ?3)",
                params![decayed as i64, forgotten as i64, promoted as i64],
            )?;
            Ok(())
        })
    }

    pub fn log_distillation_run(&self, user_id: &str, counts: &DistillationRunCounts) -> Result<String> {
        self.with_conn(|conn| {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO distillation_runs
                     (id, user_id, episodes_sampled, semantic_created, semantic_deduplicated, errors)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    user_id,
                    counts.episodes_sampled as i64,
                    counts.semantic_created as i64,
                    counts.semantic_deduplicated as i64,
                    counts.errors as i64,
                ],
            )?;
            Ok(id)
        })
    }

    /// Record which episodic memories a distilled semantic fact came from.
    pub fn add_distillation_provenance(
        &self,
        semantic_memory_id: &str,
        episodic_memory_ids: &[String],
        run_id: &str,
    ) -> Result<()> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO distillation_provenance
                     (semantic_memory_id, episodic_memory_id, run_id)
                 VALUES (?1, ?2, ?3)",
            )?;
            for episodic_id in episodic_memory_ids {
                stmt.execute(params![semantic_memory_id, episodic_id, run_id])?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        store
            .log_event("m1", "ADD", serde_json::json!({}))
            .unwrap();
        store
            .log_event("m1", "INTERFERENCE_DEMOTE", serde_json::json!({"old": 0.8, "new": 0.24}))
            .unwrap();
        let events = store.get_history("m1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "ADD");
        assert_eq!(events[1].event, "INTERFERENCE_DEMOTE");
    }

    #[test]
    fn provenance_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let ids = vec!["e1".to_string(), "e2".to_string()];
        store.add_distillation_provenance("s1", &ids, "run-1").unwrap();
        store.add_distillation_provenance("s1", &ids, "run-1").unwrap();
        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM distillation_provenance WHERE semantic_memory_id = 's1'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 2);
    }
}
