//! Memory table CRUD and bulk operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, Row};

use engram_domain::memory::{
    ConfidentialityScope, MemoryLayer, MemoryRecord, MemoryStatus, MemoryType, Sensitivity,
};

use crate::error::{Result, StoreError};
use crate::{dt_to_text, from_json_text, text_to_dt, to_json_text, Store};

/// Writable memory columns. Updates are expressed as a slice of these
/// variants; there is no string-keyed path into the table.
#[derive(Debug, Clone)]
pub enum MemoryField {
    Content(String),
    MemoryType(MemoryType),
    Layer(MemoryLayer),
    Namespace(String),
    Scope(ConfidentialityScope),
    Sensitivity(Sensitivity),
    Importance(f64),
    Immutable(bool),
    Status(MemoryStatus),
    Strength(f64),
    Traces { fast: f64, mid: f64, slow: f64 },
    AccessCount(i64),
    LastAccessed(DateTime<Utc>),
    SceneId(Option<String>),
    Categories(Vec<String>),
    RelatedMemories(Vec<String>),
    SourceMemories(Vec<String>),
    Metadata(serde_json::Value),
    Embedding(Option<Vec<f32>>),
}

impl MemoryField {
    fn into_sql(self) -> (&'static str, SqlValue) {
        match self {
            MemoryField::Content(v) => ("memory", SqlValue::Text(v)),
            MemoryField::MemoryType(v) => ("memory_type", SqlValue::Text(type_str(v).into())),
            MemoryField::Layer(v) => ("layer", SqlValue::Text(layer_str(v).into())),
            MemoryField::Namespace(v) => ("namespace", SqlValue::Text(v)),
            MemoryField::Scope(v) => {
                ("confidentiality_scope", SqlValue::Text(v.as_str().into()))
            }
            MemoryField::Sensitivity(v) => {
                ("sensitivity", SqlValue::Text(sensitivity_str(v).into()))
            }
            MemoryField::Importance(v) => ("importance", SqlValue::Real(v)),
            MemoryField::Immutable(v) => ("immutable", SqlValue::Integer(v as i64)),
            MemoryField::Status(v) => (
                "tombstone",
                SqlValue::Integer((v == MemoryStatus::Tombstoned) as i64),
            ),
            MemoryField::Strength(v) => ("strength", SqlValue::Real(v)),
            // Composite trace write touches three columns; handled by caller.
            MemoryField::Traces { .. } => unreachable!("expanded before into_sql"),
            MemoryField::AccessCount(v) => ("access_count", SqlValue::Integer(v)),
            MemoryField::LastAccessed(v) => ("last_accessed", SqlValue::Text(dt_to_text(v))),
            MemoryField::SceneId(v) => match v {
                Some(id) => ("scene_id", SqlValue::Text(id)),
                None => ("scene_id", SqlValue::Null),
            },
            MemoryField::Categories(v) => ("categories", SqlValue::Text(to_json_text(&v))),
            MemoryField::RelatedMemories(v) => {
                ("related_memories", SqlValue::Text(to_json_text(&v)))
            }
            MemoryField::SourceMemories(v) => {
                ("source_memories", SqlValue::Text(to_json_text(&v)))
            }
            MemoryField::Metadata(v) => ("metadata", SqlValue::Text(to_json_text(&v))),
            MemoryField::Embedding(v) => match v {
                Some(vec) => ("embedding", SqlValue::Text(to_json_text(&vec))),
                None => ("embedding", SqlValue::Null),
            },
        }
    }
}

/// Filters for [`Store::list_memories`].
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub user_id: Option<String>,
    pub namespace: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub layer: Option<MemoryLayer>,
    pub include_tombstoned: bool,
    pub min_strength: Option<f64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// One entry of a bulk trace write.
#[derive(Debug, Clone)]
pub struct TraceUpdate {
    pub memory_id: String,
    pub s_fast: f64,
    pub s_mid: f64,
    pub s_slow: f64,
    pub strength: f64,
}

const MEMORY_COLUMNS: &str = "id, memory, user_id, agent_id, app_id, run_id, source_app, \
     source_type, source_event_id, memory_type, layer, namespace, confidentiality_scope, \
     sensitivity, importance, immutable, tombstone, strength, s_fast, s_mid, s_slow, \
     access_count, last_accessed, decay_lambda, categories, scene_id, related_memories, \
     source_memories, metadata, embedding, created_at, updated_at";

pub(crate) fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    Ok(MemoryRecord {
        id: row.get(0)?,
        content: row.get(1)?,
        user_id: row.get(2)?,
        agent_id: row.get(3)?,
        app_id: row.get(4)?,
        run_id: row.get(5)?,
        source_app: row.get(6)?,
        source_type: row.get(7)?,
        source_event_id: row.get(8)?,
        memory_type: parse_type(row.get::<_, Option<String>>(9)?.as_deref()),
        layer: parse_layer(row.get::<_, Option<String>>(10)?.as_deref()),
        namespace: row
            .get::<_, Option<String>>(11)?
            .unwrap_or_else(|| "default".into()),
        confidentiality_scope: ConfidentialityScope::parse_lenient(
            row.get::<_, Option<String>>(12)?.as_deref().unwrap_or(""),
        ),
        sensitivity: parse_sensitivity(row.get::<_, Option<String>>(13)?.as_deref()),
        importance: row.get::<_, Option<f64>>(14)?.unwrap_or(0.5),
        immutable: row.get::<_, Option<i64>>(15)?.unwrap_or(0) != 0,
        status: if row.get::<_, Option<i64>>(16)?.unwrap_or(0) != 0 {
            MemoryStatus::Tombstoned
        } else {
            MemoryStatus::Active
        },
        strength: row.get::<_, Option<f64>>(17)?.unwrap_or(1.0),
        s_fast: row.get::<_, Option<f64>>(18)?.unwrap_or(1.0),
        s_mid: row.get::<_, Option<f64>>(19)?.unwrap_or(1.0),
        s_slow: row.get::<_, Option<f64>>(20)?.unwrap_or(1.0),
        access_count: row.get::<_, Option<i64>>(21)?.unwrap_or(0),
        last_accessed: text_to_dt(row.get(22)?),
        decay_lambda: row.get::<_, Option<f64>>(23)?.unwrap_or(0.0),
        categories: from_json_text(row.get(24)?),
        scene_id: row.get(25)?,
        related_memories: from_json_text(row.get(26)?),
        source_memories: from_json_text(row.get(27)?),
        metadata: row
            .get::<_, Option<String>>(28)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        embedding: row
            .get::<_, Option<String>>(29)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        created_at: text_to_dt(row.get(30)?),
        updated_at: text_to_dt(row.get(31)?),
    })
}

impl Store {
    pub fn add_memory(&self, memory: &MemoryRecord) -> Result<()> {
        self.with_tx(|tx| {
            insert_memory(tx, memory)?;
            tx.execute(
                "INSERT OR IGNORE INTO memory_refcounts (memory_id, strong_count, weak_count)
                 VALUES (?1, 0, 0)",
                params![memory.id],
            )?;
            Ok(())
        })
    }

    pub fn get_memory(&self, id: &str, include_tombstoned: bool) -> Result<Option<MemoryRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => {
                    let memory = row_to_memory(row)?;
                    if memory.is_tombstoned() && !include_tombstoned {
                        Ok(None)
                    } else {
                        Ok(Some(memory))
                    }
                }
                None => Ok(None),
            }
        })
    }

    /// Fetch a batch of memories by id in a single statement.
    pub fn get_memories_bulk(&self, ids: &[String]) -> Result<Vec<MemoryRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders = std::iter::repeat("?")
                .take(ids.len())
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT {MEMORY_COLUMNS} FROM memories WHERE id IN ({placeholders}) AND tombstone = 0"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), row_to_memory)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn list_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE 1=1");
            let mut values: Vec<SqlValue> = Vec::new();

            if let Some(user_id) = &query.user_id {
                sql.push_str(" AND user_id = ?");
                values.push(SqlValue::Text(user_id.clone()));
            }
            if let Some(namespace) = &query.namespace {
                sql.push_str(" AND namespace = ?");
                values.push(SqlValue::Text(namespace.clone()));
            }
            if let Some(kind) = query.memory_type {
                sql.push_str(" AND memory_type = ?");
                values.push(SqlValue::Text(type_str(kind).into()));
            }
            if let Some(layer) = query.layer {
                sql.push_str(" AND layer = ?");
                values.push(SqlValue::Text(layer_str(layer).into()));
            }
            if !query.include_tombstoned {
                sql.push_str(" AND tombstone = 0");
            }
            if let Some(min_strength) = query.min_strength {
                sql.push_str(" AND strength >= ?");
                values.push(SqlValue::Real(min_strength));
            }
            if let Some(after) = query.created_after {
                sql.push_str(" AND created_at >= ?");
                values.push(SqlValue::Text(dt_to_text(after)));
            }
            if let Some(before) = query.created_before {
                sql.push_str(" AND created_at <= ?");
                values.push(SqlValue::Text(dt_to_text(before)));
            }
            sql.push_str(" ORDER BY created_at DESC");
            if let Some(limit) = query.limit {
                sql.push_str(" LIMIT ?");
                values.push(SqlValue::Integer(limit as i64));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_memory)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Apply typed field updates; returns false when the row is missing.
    pub fn update_memory(&self, id: &str, fields: &[MemoryField]) -> Result<bool> {
        if fields.is_empty() {
            return Ok(false);
        }
        self.with_conn(|conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut values: Vec<SqlValue> = Vec::new();
            for field in fields.iter().cloned() {
                match field {
                    MemoryField::Traces { fast, mid, slow } => {
                        for (col, v) in [("s_fast", fast), ("s_mid", mid), ("s_slow", slow)] {
                            clauses.push(format!("{col} = ?"));
                            values.push(SqlValue::Real(v));
                        }
                    }
                    other => {
                        let (col, value) = other.into_sql();
                        clauses.push(format!("{col} = ?"));
                        values.push(value);
                    }
                }
            }
            clauses.push("updated_at = ?".into());
            values.push(SqlValue::Text(dt_to_text(Utc::now())));
            values.push(SqlValue::Text(id.to_string()));

            let sql = format!("UPDATE memories SET {} WHERE id = ?", clauses.join(", "));
            let changed = conn.execute(&sql, params_from_iter(values))?;
            Ok(changed > 0)
        })
    }

    /// Tombstone (default) or hard-delete a memory.
    pub fn delete_memory(&self, id: &str, use_tombstone: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = if use_tombstone {
                conn.execute(
                    "UPDATE memories SET tombstone = 1, updated_at = ?2 WHERE id = ?1",
                    params![id, dt_to_text(Utc::now())],
                )?
            } else {
                conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?
            };
            Ok(changed > 0)
        })
    }

    /// Clear a tombstone (commit-apply rollback path).
    pub fn restore_memory(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE memories SET tombstone = 0, updated_at = ?2 WHERE id = ?1",
                params![id, dt_to_text(Utc::now())],
            )?;
            Ok(changed > 0)
        })
    }

    /// Permanently remove tombstoned rows. Explicit admin operation only.
    pub fn purge_tombstoned(&self) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM memories WHERE tombstone = 1", [])?)
        })
    }

    /// Increment access counters for a batch in one transaction.
    pub fn increment_access_bulk(&self, ids: &[String], accessed_at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "UPDATE memories SET access_count = access_count + 1, last_accessed = ?2
                 WHERE id = ?1",
            )?;
            let ts = dt_to_text(accessed_at);
            for id in ids {
                stmt.execute(params![id, ts])?;
            }
            Ok(())
        })
    }

    /// Write decayed trace values for a batch in one transaction.
    pub fn update_strength_bulk(&self, updates: &[TraceUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "UPDATE memories
                 SET s_fast = ?2, s_mid = ?3, s_slow = ?4, strength = ?5, updated_at = ?6
                 WHERE id = ?1",
            )?;
            let ts = dt_to_text(Utc::now());
            let mut changed = 0;
            for u in updates {
                changed += stmt.execute(params![u.memory_id, u.s_fast, u.s_mid, u.s_slow, u.strength, ts])?;
            }
            Ok(changed)
        })
    }

    /// Active memory counts per namespace for one user.
    pub fn count_by_namespace(&self, user_id: &str) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT namespace, COUNT(*) FROM memories
                 WHERE user_id = ?1 AND tombstone = 0
                 GROUP BY namespace",
            )?;
            let rows = stmt.query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn list_user_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT user_id FROM memories
                 WHERE user_id IS NOT NULL AND user_id != ''",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Idempotency lookup: the memory previously written for this
    /// `(agent_id, source_event_id)` pair, if any.
    pub fn get_memory_by_source_event(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        source_event_id: &str,
    ) -> Result<Option<MemoryRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE user_id = ?1 AND source_event_id = ?2
                   AND ((?3 IS NULL AND agent_id IS NULL) OR agent_id = ?3)
                 ORDER BY created_at ASC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id, source_event_id, agent_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_memory(row)?)),
                None => Ok(None),
            }
        })
    }
}

pub(crate) fn insert_memory(conn: &Connection, m: &MemoryRecord) -> Result<()> {
    let changed = conn.execute(
        "INSERT INTO memories (
            id, memory, user_id, agent_id, app_id, run_id, source_app, source_type,
            source_event_id, memory_type, layer, namespace, confidentiality_scope,
            sensitivity, importance, immutable, tombstone, strength, s_fast, s_mid,
            s_slow, access_count, last_accessed, decay_lambda, categories, scene_id,
            related_memories, source_memories, metadata, embedding, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32)",
        params![
            m.id,
            m.content,
            m.user_id,
            m.agent_id,
            m.app_id,
            m.run_id,
            m.source_app,
            m.source_type,
            m.source_event_id,
            type_str(m.memory_type),
            layer_str(m.layer),
            m.namespace,
            m.confidentiality_scope.as_str(),
            sensitivity_str(m.sensitivity),
            m.importance,
            m.immutable as i64,
            m.is_tombstoned() as i64,
            m.strength,
            m.s_fast,
            m.s_mid,
            m.s_slow,
            m.access_count,
            dt_to_text(m.last_accessed),
            m.decay_lambda,
            to_json_text(&m.categories),
            m.scene_id,
            to_json_text(&m.related_memories),
            to_json_text(&m.source_memories),
            to_json_text(&m.metadata),
            m.embedding.as_ref().map(to_json_text),
            dt_to_text(m.created_at),
            dt_to_text(m.updated_at),
        ],
    )?;
    if changed != 1 {
        return Err(StoreError::IntegrityError(format!(
            "memory insert affected {changed} rows"
        )));
    }
    Ok(())
}

pub(crate) fn type_str(v: MemoryType) -> &'static str {
    match v {
        MemoryType::Episodic => "episodic",
        MemoryType::Semantic => "semantic",
    }
}

pub(crate) fn parse_type(raw: Option<&str>) -> MemoryType {
    match raw {
        Some("episodic") => MemoryType::Episodic,
        _ => MemoryType::Semantic,
    }
}

pub(crate) fn layer_str(v: MemoryLayer) -> &'static str {
    match v {
        MemoryLayer::Sml => "sml",
        MemoryLayer::Lml => "lml",
    }
}

pub(crate) fn parse_layer(raw: Option<&str>) -> MemoryLayer {
    match raw {
        Some("lml") => MemoryLayer::Lml,
        _ => MemoryLayer::Sml,
    }
}

fn sensitivity_str(v: Sensitivity) -> &'static str {
    match v {
        Sensitivity::Normal => "normal",
        Sensitivity::Sensitive => "sensitive",
        Sensitivity::Secret => "secret",
    }
}

fn parse_sensitivity(raw: Option<&str>) -> Sensitivity {
    match raw {
        Some("sensitive") => Sensitivity::Sensitive,
        Some("secret") => Sensitivity::Secret,
        _ => Sensitivity::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(user: &str, content: &str) -> MemoryRecord {
        MemoryRecord::new(content, user)
    }

    #[test]
    fn add_get_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let mut m = sample("u1", "likes green tea");
        m.categories = vec!["preferences".into()];
        m.embedding = Some(vec![0.1, 0.2]);
        store.add_memory(&m).unwrap();

        let got = store.get_memory(&m.id, false).unwrap().unwrap();
        assert_eq!(got.content, "likes green tea");
        assert_eq!(got.categories, vec!["preferences".to_string()]);
        assert_eq!(got.embedding.unwrap().len(), 2);
        assert_eq!(got.namespace, "default");
    }

    #[test]
    fn duplicate_id_is_unique_violation() {
        let store = Store::open_in_memory().unwrap();
        let m = sample("u1", "one");
        store.add_memory(&m).unwrap();
        let err = store.add_memory(&m).unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[test]
    fn tombstone_hides_unless_included() {
        let store = Store::open_in_memory().unwrap();
        let m = sample("u1", "temp");
        store.add_memory(&m).unwrap();
        assert!(store.delete_memory(&m.id, true).unwrap());
        assert!(store.get_memory(&m.id, false).unwrap().is_none());
        assert!(store.get_memory(&m.id, true).unwrap().is_some());

        assert!(store.restore_memory(&m.id).unwrap());
        assert!(store.get_memory(&m.id, false).unwrap().is_some());
    }

    #[test]
    fn typed_updates_apply() {
        let store = Store::open_in_memory().unwrap();
        let m = sample("u1", "will change");
        store.add_memory(&m).unwrap();

        store
            .update_memory(
                &m.id,
                &[
                    MemoryField::Strength(0.42),
                    MemoryField::Traces {
                        fast: 0.1,
                        mid: 0.4,
                        slow: 0.6,
                    },
                    MemoryField::Layer(MemoryLayer::Lml),
                ],
            )
            .unwrap();

        let got = store.get_memory(&m.id, false).unwrap().unwrap();
        assert_eq!(got.strength, 0.42);
        assert_eq!(got.s_mid, 0.4);
        assert_eq!(got.layer, MemoryLayer::Lml);
    }

    #[test]
    fn bulk_ops_and_namespace_counts() {
        let store = Store::open_in_memory().unwrap();
        let a = sample("u1", "a");
        let mut b = sample("u1", "b");
        b.namespace = "projects".into();
        store.add_memory(&a).unwrap();
        store.add_memory(&b).unwrap();

        store
            .increment_access_bulk(&[a.id.clone(), b.id.clone()], Utc::now())
            .unwrap();
        let got = store.get_memories_bulk(&[a.id.clone(), b.id.clone()]).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|m| m.access_count == 1));

        let mut counts = store.count_by_namespace("u1").unwrap();
        counts.sort();
        assert_eq!(
            counts,
            vec![("default".to_string(), 1), ("projects".to_string(), 1)]
        );
    }

    #[test]
    fn source_event_lookup_matches_agent() {
        let store = Store::open_in_memory().unwrap();
        let mut m = sample("u1", "event write");
        m.agent_id = Some("agent-a".into());
        m.source_event_id = Some("evt-1".into());
        store.add_memory(&m).unwrap();

        let hit = store
            .get_memory_by_source_event("u1", Some("agent-a"), "evt-1")
            .unwrap();
        assert!(hit.is_some());
        let miss = store
            .get_memory_by_source_event("u1", Some("agent-b"), "evt-1")
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn empty_bulk_inputs_are_noops() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_memories_bulk(&[]).unwrap().is_empty());
        store.increment_access_bulk(&[], Utc::now()).unwrap();
        assert_eq!(store.update_strength_bulk(&[]).unwrap(), 0);
    }
}
