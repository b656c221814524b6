//! Proposal commits, conflict stash and invariants.

use chrono::Utc;
use rusqlite::{params, Row};

use engram_domain::staging::{
    ChangeOp, CommitChecks, CommitStatus, ConflictStash, InvariantRecord, ProposalChange,
    ProposalCommit, StashResolution,
};

use crate::error::Result;
use crate::{dt_to_text, opt_dt_to_text, text_to_dt, text_to_opt_dt, to_json_text, Store};

const COMMIT_COLUMNS: &str =
    "id, user_id, agent_id, scope, status, checks, preview, provenance, source_event_id, \
     created_at, updated_at";

fn row_to_commit(row: &Row<'_>) -> rusqlite::Result<ProposalCommit> {
    let checks: CommitChecks = row
        .get::<_, Option<String>>(5)?
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    Ok(ProposalCommit {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        scope: row.get(3)?,
        status: CommitStatus::parse(&row.get::<_, String>(4)?).unwrap_or(CommitStatus::Pending),
        checks,
        preview: parse_json(row.get(6)?),
        provenance: parse_json(row.get(7)?),
        created_at: text_to_dt(row.get(9)?),
        updated_at: text_to_dt(row.get(10)?),
    })
}

fn parse_json(raw: Option<String>) -> serde_json::Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
}

impl Store {
    /// Insert a commit together with its ordered changes, atomically.
    pub fn add_commit(&self, commit: &ProposalCommit, changes: &[ProposalChange]) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO proposal_commits
                     (id, user_id, agent_id, scope, status, checks, preview, provenance,
                      source_event_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    commit.id,
                    commit.user_id,
                    commit.agent_id,
                    commit.scope,
                    commit.status.as_str(),
                    to_json_text(&commit.checks),
                    to_json_text(&commit.preview),
                    to_json_text(&commit.provenance),
                    Option::<String>::None,
                    dt_to_text(commit.created_at),
                    dt_to_text(commit.updated_at),
                ],
            )?;
            for change in changes {
                tx.execute(
                    "INSERT INTO proposal_changes (id, commit_id, op, target, target_id, patch, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        change.id,
                        change.commit_id,
                        change.op.as_str(),
                        change.target,
                        change.target_id,
                        to_json_text(&change.patch),
                        dt_to_text(change.created_at),
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn get_commit(&self, commit_id: &str) -> Result<Option<ProposalCommit>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {COMMIT_COLUMNS} FROM proposal_commits WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![commit_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_commit(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_commits(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
        status: Option<CommitStatus>,
        limit: usize,
    ) -> Result<Vec<ProposalCommit>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {COMMIT_COLUMNS} FROM proposal_commits WHERE 1=1");
            let mut values: Vec<rusqlite::types::Value> = Vec::new();
            if let Some(user_id) = user_id {
                sql.push_str(" AND user_id = ?");
                values.push(user_id.to_string().into());
            }
            if let Some(agent_id) = agent_id {
                sql.push_str(" AND agent_id = ?");
                values.push(agent_id.to_string().into());
            }
            if let Some(status) = status {
                sql.push_str(" AND status = ?");
                values.push(status.as_str().to_string().into());
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?");
            values.push((limit as i64).into());

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(values), row_to_commit)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn get_commit_changes(&self, commit_id: &str) -> Result<Vec<ProposalChange>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, commit_id, op, target, target_id, patch, created_at
                 FROM proposal_changes WHERE commit_id = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![commit_id], |row| {
                Ok(ProposalChange {
                    id: row.get(0)?,
                    commit_id: row.get(1)?,
                    op: ChangeOp::parse(&row.get::<_, String>(2)?).unwrap_or(ChangeOp::Add),
                    target: row.get(3)?,
                    target_id: row.get(4)?,
                    patch: parse_json(row.get(5)?),
                    created_at: text_to_dt(row.get(6)?),
                })
            })?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Atomic CAS on commit status: moves to `to_status` only from one of
    /// `from_statuses`. Returns false when the precondition fails.
    pub fn transition_commit_status(
        &self,
        commit_id: &str,
        from_statuses: &[CommitStatus],
        to_status: CommitStatus,
        checks: Option<&CommitChecks>,
    ) -> Result<bool> {
        if from_statuses.is_empty() {
            return Ok(false);
        }
        self.with_conn(|conn| {
            let placeholders = std::iter::repeat("?")
                .take(from_statuses.len())
                .collect::<Vec<_>>()
                .join(", ");
            let mut values: Vec<rusqlite::types::Value> = vec![
                to_status.as_str().to_string().into(),
                dt_to_text(Utc::now()).into(),
            ];
            let mut sql = String::from("UPDATE proposal_commits SET status = ?, updated_at = ?");
            if let Some(checks) = checks {
                sql.push_str(", checks = ?");
                values.push(to_json_text(checks).into());
            }
            sql.push_str(&format!(" WHERE id = ? AND status IN ({placeholders})"));
            values.push(commit_id.to_string().into());
            for status in from_statuses {
                values.push(status.as_str().to_string().into());
            }
            Ok(conn.execute(&sql, rusqlite::params_from_iter(values))? > 0)
        })
    }

    /// Replace a commit's provenance blob (e.g. the applied memory ids).
    pub fn set_commit_provenance(
        &self,
        commit_id: &str,
        provenance: &serde_json::Value,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE proposal_commits SET provenance = ?2, updated_at = ?3 WHERE id = ?1",
                params![commit_id, to_json_text(provenance), dt_to_text(Utc::now())],
            )?;
            Ok(())
        })
    }

    /// Record the idempotency key after a successful apply.
    pub fn set_commit_source_event(&self, commit_id: &str, source_event_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE proposal_commits SET source_event_id = ?2 WHERE id = ?1",
                params![commit_id, source_event_id],
            )?;
            Ok(())
        })
    }

    /// Prior successful commit for this `(agent_id, source_event_id)`.
    pub fn get_commit_by_source_event(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        source_event_id: &str,
    ) -> Result<Option<ProposalCommit>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COMMIT_COLUMNS} FROM proposal_commits
                 WHERE user_id = ?1 AND source_event_id = ?2
                   AND ((?3 IS NULL AND agent_id IS NULL) OR agent_id = ?3)
                 ORDER BY created_at ASC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id, source_event_id, agent_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_commit(row)?)),
                None => Ok(None),
            }
        })
    }

    // ── Conflict stash ───────────────────────────────────────────────

    pub fn add_conflict_stash(&self, stash: &ConflictStash) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conflict_stash
                     (id, user_id, conflict_key, existing, proposed, resolution,
                      source_commit_id, created_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    stash.id,
                    stash.user_id,
                    stash.conflict_key,
                    to_json_text(&stash.existing),
                    to_json_text(&stash.proposed),
                    stash.resolution.as_str(),
                    stash.source_commit_id,
                    dt_to_text(stash.created_at),
                    opt_dt_to_text(stash.resolved_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_conflict_stash(&self, stash_id: &str) -> Result<Option<ConflictStash>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, conflict_key, existing, proposed, resolution,
                        source_commit_id, created_at, resolved_at
                 FROM conflict_stash WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![stash_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_stash(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_conflict_stash(
        &self,
        user_id: Option<&str>,
        resolution: Option<StashResolution>,
        limit: usize,
    ) -> Result<Vec<ConflictStash>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, user_id, conflict_key, existing, proposed, resolution,
                        source_commit_id, created_at, resolved_at
                 FROM conflict_stash WHERE 1=1",
            );
            let mut values: Vec<rusqlite::types::Value> = Vec::new();
            if let Some(user_id) = user_id {
                sql.push_str(" AND user_id = ?");
                values.push(user_id.to_string().into());
            }
            if let Some(resolution) = resolution {
                sql.push_str(" AND resolution = ?");
                values.push(resolution.as_str().to_string().into());
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?");
            values.push((limit as i64).into());

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(values), row_to_stash)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Move a stash out of `UNRESOLVED`; the resolution itself is one-shot.
    pub fn resolve_conflict_stash(
        &self,
        stash_id: &str,
        resolution: StashResolution,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conflict_stash SET resolution = ?2, resolved_at = ?3
                 WHERE id = ?1 AND resolution = 'UNRESOLVED'",
                params![stash_id, resolution.as_str(), dt_to_text(Utc::now())],
            )?;
            Ok(changed > 0)
        })
    }

    // ── Invariants ───────────────────────────────────────────────────

    pub fn upsert_invariant(&self, invariant: &InvariantRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO invariants
                     (id, user_id, invariant_key, invariant_value, category, confidence,
                      source_memory_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(user_id, invariant_key) DO UPDATE SET
                     invariant_value = excluded.invariant_value,
                     category = excluded.category,
                     confidence = excluded.confidence,
                     source_memory_id = excluded.source_memory_id,
                     updated_at = excluded.updated_at",
                params![
                    invariant.id,
                    invariant.user_id,
                    invariant.invariant_key,
                    invariant.invariant_value,
                    invariant.category,
                    invariant.confidence,
                    invariant.source_memory_id,
                    dt_to_text(invariant.created_at),
                    dt_to_text(invariant.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_invariant(&self, user_id: &str, key: &str) -> Result<Option<InvariantRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, invariant_key, invariant_value, category, confidence,
                        source_memory_id, created_at, updated_at
                 FROM invariants WHERE user_id = ?1 AND invariant_key = ?2",
            )?;
            let mut rows = stmt.query(params![user_id, key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_invariant(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_invariants(&self, user_id: &str) -> Result<Vec<InvariantRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, invariant_key, invariant_value, category, confidence,
                        source_memory_id, created_at, updated_at
                 FROM invariants WHERE user_id = ?1 ORDER BY invariant_key",
            )?;
            let rows = stmt.query_map(params![user_id], row_to_invariant)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }
}

fn row_to_stash(row: &Row<'_>) -> rusqlite::Result<ConflictStash> {
    Ok(ConflictStash {
        id: row.get(0)?,
        user_id: row.get(1)?,
        conflict_key: row.get(2)?,
        existing: parse_json(row.get(3)?),
        proposed: parse_json(row.get(4)?),
        resolution: StashResolution::parse(&row.get::<_, String>(5)?)
            .unwrap_or(StashResolution::Unresolved),
        source_commit_id: row.get(6)?,
        created_at: text_to_dt(row.get(7)?),
        resolved_at: text_to_opt_dt(row.get(8)?),
    })
}

fn row_to_invariant(row: &Row<'_>) -> rusqlite::Result<InvariantRecord> {
    Ok(InvariantRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        invariant_key: row.get(2)?,
        invariant_value: row.get(3)?,
        category: row
            .get::<_, Option<String>>(4)?
            .unwrap_or_else(|| "identity".into()),
        confidence: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        source_memory_id: row.get(6)?,
        created_at: text_to_dt(row.get(7)?),
        updated_at: text_to_dt(row.get(8)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn commit(user: &str) -> ProposalCommit {
        let now = Utc::now();
        ProposalCommit {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.into(),
            agent_id: Some("agent-a".into()),
            scope: Some("work".into()),
            status: CommitStatus::Pending,
            checks: CommitChecks {
                invariants_ok: true,
                ..Default::default()
            },
            preview: serde_json::json!({"content": "x"}),
            provenance: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    fn change(commit_id: &str) -> ProposalChange {
        ProposalChange {
            id: uuid::Uuid::new_v4().to_string(),
            commit_id: commit_id.into(),
            op: ChangeOp::Add,
            target: "memory".into(),
            target_id: None,
            patch: serde_json::json!({"content": "x"}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cas_transition_is_one_shot() {
        let store = Store::open_in_memory().unwrap();
        let c = commit("u1");
        store.add_commit(&c, &[change(&c.id)]).unwrap();

        let moved = store
            .transition_commit_status(
                &c.id,
                &[CommitStatus::Pending, CommitStatus::AutoStashed],
                CommitStatus::Approved,
                None,
            )
            .unwrap();
        assert!(moved);

        // Second attempt fails the precondition; status is unchanged.
        let moved_again = store
            .transition_commit_status(
                &c.id,
                &[CommitStatus::Pending, CommitStatus::AutoStashed],
                CommitStatus::Approved,
                None,
            )
            .unwrap();
        assert!(!moved_again);
        assert_eq!(
            store.get_commit(&c.id).unwrap().unwrap().status,
            CommitStatus::Approved
        );
    }

    #[test]
    fn changes_come_back_in_order() {
        let store = Store::open_in_memory().unwrap();
        let c = commit("u1");
        let changes = vec![change(&c.id), change(&c.id), change(&c.id)];
        store.add_commit(&c, &changes).unwrap();
        let got = store.get_commit_changes(&c.id).unwrap();
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn stash_resolution_is_one_shot() {
        let store = Store::open_in_memory().unwrap();
        let stash = ConflictStash {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            conflict_key: "identity.name".into(),
            existing: serde_json::json!({"value": "Alice"}),
            proposed: serde_json::json!({"value": "Bob"}),
            resolution: StashResolution::Unresolved,
            source_commit_id: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        store.add_conflict_stash(&stash).unwrap();

        assert!(store
            .resolve_conflict_stash(&stash.id, StashResolution::KeepExisting)
            .unwrap());
        assert!(!store
            .resolve_conflict_stash(&stash.id, StashResolution::AcceptProposed)
            .unwrap());
    }

    #[test]
    fn invariant_upsert_keeps_single_row() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut inv = InvariantRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            invariant_key: "identity.name".into(),
            invariant_value: "Alice".into(),
            category: "identity".into(),
            confidence: 0.9,
            source_memory_id: None,
            created_at: now,
            updated_at: now,
        };
        store.upsert_invariant(&inv).unwrap();
        inv.id = uuid::Uuid::new_v4().to_string();
        inv.invariant_value = "Alicia".into();
        store.upsert_invariant(&inv).unwrap();

        let all = store.list_invariants("u1").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].invariant_value, "Alicia");
    }
}
