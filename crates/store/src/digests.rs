//! Daily digest upserts.

use chrono::Utc;
use rusqlite::params;

use engram_domain::digest::DailyDigest;

use crate::error::Result;
use crate::{dt_to_text, text_to_dt, to_json_text, Store};

impl Store {
    pub fn upsert_daily_digest(
        &self,
        user_id: &str,
        digest_date: &str,
        payload: &serde_json::Value,
    ) -> Result<String> {
        self.with_conn(|conn| {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO daily_digests (id, user_id, digest_date, payload, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, digest_date) DO UPDATE SET
                     payload = excluded.payload,
                     generated_at = excluded.generated_at",
                params![id, user_id, digest_date, to_json_text(payload), dt_to_text(Utc::now())],
            )?;
            let id: String = conn.query_row(
                "SELECT id FROM daily_digests WHERE user_id = ?1 AND digest_date = ?2",
                params![user_id, digest_date],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    pub fn get_daily_digest(&self, user_id: &str, digest_date: &str) -> Result<Option<DailyDigest>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, digest_date, payload, generated_at
                 FROM daily_digests WHERE user_id = ?1 AND digest_date = ?2",
            )?;
            let mut rows = stmt.query(params![user_id, digest_date])?;
            match rows.next()? {
                Some(row) => Ok(Some(DailyDigest {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    digest_date: row.get(2)?,
                    payload: row
                        .get::<_, Option<String>>(3)?
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
                    generated_at: text_to_dt(row.get(4)?),
                })),
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_same_day_payload() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .upsert_daily_digest("u1", "2026-08-01", &serde_json::json!({"v": 1}))
            .unwrap();
        let second = store
            .upsert_daily_digest("u1", "2026-08-01", &serde_json::json!({"v": 2}))
            .unwrap();
        assert_eq!(first, second);

        let digest = store.get_daily_digest("u1", "2026-08-01").unwrap().unwrap();
        assert_eq!(digest.payload["v"], 2);
        assert!(store.get_daily_digest("u1", "2026-08-02").unwrap().is_none());
    }
}
