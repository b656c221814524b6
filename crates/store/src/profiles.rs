//! Profile table CRUD.

use chrono::Utc;
use rusqlite::{params, Row};

use engram_domain::scene::{Profile, ProfileType};

use crate::error::Result;
use crate::{dt_to_text, from_json_text, text_to_dt, to_json_text, Store};

const PROFILE_COLUMNS: &str = "id, user_id, name, profile_type, narrative, facts, preferences, \
     relationships, aliases, embedding, strength, created_at, updated_at";

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        profile_type: row
            .get::<_, Option<String>>(3)?
            .as_deref()
            .and_then(ProfileType::parse)
            .unwrap_or(ProfileType::Contact),
        narrative: row.get(4)?,
        facts: from_json_text(row.get(5)?),
        preferences: from_json_text(row.get(6)?),
        relationships: from_json_text(row.get(7)?),
        aliases: from_json_text(row.get(8)?),
        embedding: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        strength: row.get::<_, Option<f64>>(10)?.unwrap_or(1.0),
        created_at: text_to_dt(row.get(11)?),
        updated_at: text_to_dt(row.get(12)?),
    })
}

impl Store {
    pub fn add_profile(&self, profile: &Profile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, user_id, name, profile_type, narrative, facts,
                     preferences, relationships, aliases, embedding, strength, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    profile.id,
                    profile.user_id,
                    profile.name,
                    profile.profile_type.as_str(),
                    profile.narrative,
                    to_json_text(&profile.facts),
                    to_json_text(&profile.preferences),
                    to_json_text(&profile.relationships),
                    to_json_text(&profile.aliases),
                    profile.embedding.as_ref().map(to_json_text),
                    profile.strength,
                    dt_to_text(profile.created_at),
                    dt_to_text(profile.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Replace the mutable profile fields wholesale; profiles are small.
    pub fn save_profile(&self, profile: &Profile) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE profiles
                 SET name = ?2, narrative = ?3, facts = ?4, preferences = ?5,
                     relationships = ?6, aliases = ?7, embedding = ?8, strength = ?9,
                     updated_at = ?10
                 WHERE id = ?1",
                params![
                    profile.id,
                    profile.name,
                    profile.narrative,
                    to_json_text(&profile.facts),
                    to_json_text(&profile.preferences),
                    to_json_text(&profile.relationships),
                    to_json_text(&profile.aliases),
                    profile.embedding.as_ref().map(to_json_text),
                    profile.strength,
                    dt_to_text(Utc::now()),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_profile(row)?)),
                None => Ok(None),
            }
        })
    }

    /// The user's unique `self` profile, if created.
    pub fn get_self_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles
                 WHERE user_id = ?1 AND profile_type = 'self' LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_profile(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Case-insensitive lookup by profile name.
    pub fn get_profile_by_name(&self, user_id: &str, name: &str) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles
                 WHERE user_id = ?1 AND LOWER(name) = LOWER(?2) LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id, name])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_profile(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_profiles(&self, user_id: Option<&str>) -> Result<Vec<Profile>> {
        self.with_conn(|conn| {
            match user_id {
                Some(user_id) => {
                    let sql = format!(
                        "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?1 ORDER BY name"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(params![user_id], row_to_profile)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    Ok(rows)
                }
                None => {
                    let sql =
                        format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY user_id, name");
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map([], row_to_profile)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    Ok(rows)
                }
            }
        })
    }

    pub fn add_profile_memory(&self, profile_id: &str, memory_id: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO profile_memories (profile_id, memory_id, role)
                 VALUES (?1, ?2, ?3)",
                params![profile_id, memory_id, role],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_profile_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let mut p = Profile::new("u1", "Ada", ProfileType::SelfProfile);
        p.facts.push("prefers tea".into());
        store.add_profile(&p).unwrap();

        let got = store.get_self_profile("u1").unwrap().unwrap();
        assert_eq!(got.name, "Ada");
        assert_eq!(got.profile_type, ProfileType::SelfProfile);
        assert_eq!(got.facts, vec!["prefers tea".to_string()]);
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        let store = Store::open_in_memory().unwrap();
        let p = Profile::new("u1", "Marcus", ProfileType::Contact);
        store.add_profile(&p).unwrap();
        assert!(store.get_profile_by_name("u1", "marcus").unwrap().is_some());
        assert!(store.get_profile_by_name("u2", "marcus").unwrap().is_none());
    }

    #[test]
    fn save_replaces_fields() {
        let store = Store::open_in_memory().unwrap();
        let mut p = Profile::new("u1", "Ada", ProfileType::SelfProfile);
        store.add_profile(&p).unwrap();
        p.facts.push("works at Atlas Corp".into());
        assert!(store.save_profile(&p).unwrap());
        let got = store.get_profile(&p.id).unwrap().unwrap();
        assert_eq!(got.facts.len(), 1);
    }
}
