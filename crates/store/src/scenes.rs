//! Scene table CRUD and the scene↔memory junction.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Row};

use engram_domain::scene::Scene;

use crate::error::Result;
use crate::{dt_to_text, from_json_text, opt_dt_to_text, text_to_dt, text_to_opt_dt, to_json_text, Store};

/// Writable scene columns.
#[derive(Debug, Clone)]
pub enum SceneField {
    Title(Option<String>),
    Summary(Option<String>),
    Topic(Option<String>),
    Location(Option<String>),
    Participants(Vec<String>),
    MemoryIds(Vec<String>),
    EndTime(Option<DateTime<Utc>>),
    Embedding(Option<Vec<f32>>),
    Strength(f64),
    Namespace(String),
    Tombstone(bool),
}

impl SceneField {
    fn into_sql(self) -> (&'static str, SqlValue) {
        fn opt_text(v: Option<String>) -> SqlValue {
            match v {
                Some(s) => SqlValue::Text(s),
                None => SqlValue::Null,
            }
        }
        match self {
            SceneField::Title(v) => ("title", opt_text(v)),
            SceneField::Summary(v) => ("summary", opt_text(v)),
            SceneField::Topic(v) => ("topic", opt_text(v)),
            SceneField::Location(v) => ("location", opt_text(v)),
            SceneField::Participants(v) => ("participants", SqlValue::Text(to_json_text(&v))),
            SceneField::MemoryIds(v) => ("memory_ids", SqlValue::Text(to_json_text(&v))),
            SceneField::EndTime(v) => ("end_time", opt_text(opt_dt_to_text(v))),
            SceneField::Embedding(v) => (
                "embedding",
                match v {
                    Some(vec) => SqlValue::Text(to_json_text(&vec)),
                    None => SqlValue::Null,
                },
            ),
            SceneField::Strength(v) => ("strength", SqlValue::Real(v)),
            SceneField::Namespace(v) => ("namespace", SqlValue::Text(v)),
            SceneField::Tombstone(v) => ("tombstone", SqlValue::Integer(v as i64)),
        }
    }
}

const SCENE_COLUMNS: &str = "id, user_id, title, summary, topic, location, participants, \
     memory_ids, start_time, end_time, embedding, strength, access_count, namespace, tombstone";

fn row_to_scene(row: &Row<'_>) -> rusqlite::Result<Scene> {
    Ok(Scene {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        topic: row.get(4)?,
        location: row.get(5)?,
        participants: from_json_text(row.get(6)?),
        memory_ids: from_json_text(row.get(7)?),
        start_time: text_to_dt(row.get(8)?),
        end_time: text_to_opt_dt(row.get(9)?),
        embedding: row
            .get::<_, Option<String>>(10)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        strength: row.get::<_, Option<f64>>(11)?.unwrap_or(1.0),
        access_count: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
        namespace: row
            .get::<_, Option<String>>(13)?
            .unwrap_or_else(|| "default".into()),
        tombstone: row.get::<_, Option<i64>>(14)?.unwrap_or(0) != 0,
    })
}

impl Store {
    pub fn add_scene(&self, scene: &Scene) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scenes (id, user_id, title, summary, topic, location, participants,
                     memory_ids, start_time, end_time, embedding, strength, access_count,
                     namespace, tombstone)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    scene.id,
                    scene.user_id,
                    scene.title,
                    scene.summary,
                    scene.topic,
                    scene.location,
                    to_json_text(&scene.participants),
                    to_json_text(&scene.memory_ids),
                    dt_to_text(scene.start_time),
                    opt_dt_to_text(scene.end_time),
                    scene.embedding.as_ref().map(to_json_text),
                    scene.strength,
                    scene.access_count,
                    scene.namespace,
                    scene.tombstone as i64,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_scene(&self, id: &str) -> Result<Option<Scene>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE id = ?1 AND tombstone = 0");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_scene(row)?)),
                None => Ok(None),
            }
        })
    }

    /// The user's single open scene (no end_time), most recent first.
    pub fn get_open_scene(&self, user_id: &str) -> Result<Option<Scene>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SCENE_COLUMNS} FROM scenes
                 WHERE user_id = ?1 AND end_time IS NULL AND tombstone = 0
                 ORDER BY start_time DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_scene(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_scenes(
        &self,
        user_id: Option<&str>,
        start_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Scene>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE tombstone = 0");
            let mut values: Vec<SqlValue> = Vec::new();
            if let Some(user_id) = user_id {
                sql.push_str(" AND user_id = ?");
                values.push(SqlValue::Text(user_id.to_string()));
            }
            if let Some(before) = start_before {
                sql.push_str(" AND start_time <= ?");
                values.push(SqlValue::Text(dt_to_text(before)));
            }
            sql.push_str(" ORDER BY start_time DESC LIMIT ?");
            values.push(SqlValue::Integer(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_scene)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn update_scene(&self, id: &str, fields: &[SceneField]) -> Result<bool> {
        if fields.is_empty() {
            return Ok(false);
        }
        self.with_conn(|conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut values: Vec<SqlValue> = Vec::new();
            for field in fields.iter().cloned() {
                let (col, value) = field.into_sql();
                clauses.push(format!("{col} = ?"));
                values.push(value);
            }
            values.push(SqlValue::Text(id.to_string()));
            let sql = format!("UPDATE scenes SET {} WHERE id = ?", clauses.join(", "));
            Ok(conn.execute(&sql, params_from_iter(values))? > 0)
        })
    }

    pub fn add_scene_memory(&self, scene_id: &str, memory_id: &str, position: usize) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO scene_memories (scene_id, memory_id, position)
                 VALUES (?1, ?2, ?3)",
                params![scene_id, memory_id, position as i64],
            )?;
            Ok(())
        })
    }

    /// Member memory ids in junction order.
    pub fn get_scene_memory_ids(&self, scene_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id FROM scene_memories WHERE scene_id = ?1 ORDER BY position ASC",
            )?;
            let rows = stmt.query_map(params![scene_id], |row| row.get(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(user: &str) -> Scene {
        Scene {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.into(),
            title: Some("morning planning".into()),
            summary: None,
            topic: Some("planning".into()),
            location: None,
            participants: vec![],
            memory_ids: vec![],
            start_time: Utc::now(),
            end_time: None,
            embedding: Some(vec![0.5, 0.5]),
            strength: 1.0,
            access_count: 0,
            namespace: "default".into(),
            tombstone: false,
        }
    }

    #[test]
    fn open_scene_lookup_and_close() {
        let store = Store::open_in_memory().unwrap();
        let s = scene("u1");
        store.add_scene(&s).unwrap();

        let open = store.get_open_scene("u1").unwrap().unwrap();
        assert_eq!(open.id, s.id);

        store
            .update_scene(&s.id, &[SceneField::EndTime(Some(Utc::now()))])
            .unwrap();
        assert!(store.get_open_scene("u1").unwrap().is_none());
    }

    #[test]
    fn junction_preserves_position_order() {
        let store = Store::open_in_memory().unwrap();
        let s = scene("u1");
        store.add_scene(&s).unwrap();
        store.add_scene_memory(&s.id, "m2", 1).unwrap();
        store.add_scene_memory(&s.id, "m1", 0).unwrap();
        // Re-adding an existing pair is idempotent.
        store.add_scene_memory(&s.id, "m1", 5).unwrap();

        let ids = store.get_scene_memory_ids(&s.id).unwrap();
        assert_eq!(ids, vec!["m1".to_string(), "m2".to_string()]);
    }
}
