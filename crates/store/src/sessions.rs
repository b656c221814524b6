//! Session rows. Only token hashes are persisted.

use chrono::Utc;
use rusqlite::{params, Row};

use engram_domain::session::SessionRecord;

use crate::error::Result;
use crate::{dt_to_text, from_json_text, text_to_dt, text_to_opt_dt, to_json_text, Store};

const SESSION_COLUMNS: &str = "id, token_hash, user_id, agent_id, allowed_confidentiality_scopes, \
     capabilities, namespaces, expires_at, created_at, revoked_at";

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        user_id: row.get(2)?,
        agent_id: row.get(3)?,
        // NULL means unrestricted; '[]' means everything masked.
        allowed_confidentiality_scopes: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        capabilities: from_json_text(row.get(5)?),
        namespaces: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| vec!["*".to_string()]),
        expires_at: text_to_dt(row.get(7)?),
        created_at: text_to_dt(row.get(8)?),
        revoked_at: text_to_opt_dt(row.get(9)?),
    })
}

impl Store {
    pub fn create_session(&self, session: &SessionRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions
                     (id, token_hash, user_id, agent_id, allowed_confidentiality_scopes,
                      capabilities, namespaces, expires_at, created_at, revoked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
                params![
                    session.id,
                    session.token_hash,
                    session.user_id,
                    session.agent_id,
                    session
                        .allowed_confidentiality_scopes
                        .as_ref()
                        .map(to_json_text),
                    to_json_text(&session.capabilities),
                    to_json_text(&session.namespaces),
                    dt_to_text(session.expires_at),
                    dt_to_text(session.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session_by_token_hash(&self, token_hash: &str) -> Result<Option<SessionRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![token_hash])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn revoke_session(&self, session_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET revoked_at = ?2 WHERE id = ?1 AND revoked_at IS NULL",
                params![session_id, dt_to_text(Utc::now())],
            )?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use engram_domain::capability::Capability;
    use engram_domain::memory::ConfidentialityScope;

    fn session(hash: &str) -> SessionRecord {
        SessionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            token_hash: hash.into(),
            user_id: "u1".into(),
            agent_id: Some("agent-a".into()),
            allowed_confidentiality_scopes: Some(vec![ConfidentialityScope::Work]),
            capabilities: vec![Capability::Search, Capability::ProposeWrite],
            namespaces: vec!["default".into()],
            expires_at: Utc::now() + Duration::minutes(30),
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[test]
    fn token_hash_lookup_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&session("hash-a")).unwrap();
        let got = store.get_session_by_token_hash("hash-a").unwrap().unwrap();
        assert_eq!(got.user_id, "u1");
        assert_eq!(
            got.allowed_confidentiality_scopes,
            Some(vec![ConfidentialityScope::Work])
        );
        assert!(store.get_session_by_token_hash("other").unwrap().is_none());
    }

    #[test]
    fn token_hash_is_unique() {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&session("dup")).unwrap();
        assert!(store.create_session(&session("dup")).is_err());
    }

    #[test]
    fn null_scopes_mean_unrestricted() {
        let store = Store::open_in_memory().unwrap();
        let mut s = session("local");
        s.allowed_confidentiality_scopes = None;
        store.create_session(&s).unwrap();
        let got = store.get_session_by_token_hash("local").unwrap().unwrap();
        assert!(got.allowed_confidentiality_scopes.is_none());
    }

    #[test]
    fn revoke_is_one_shot() {
        let store = Store::open_in_memory().unwrap();
        let s = session("r");
        store.create_session(&s).unwrap();
        assert!(store.revoke_session(&s.id).unwrap());
        assert!(!store.revoke_session(&s.id).unwrap());
        assert!(store
            .get_session_by_token_hash("r")
            .unwrap()
            .unwrap()
            .is_revoked());
    }
}
