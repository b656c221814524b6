//! Handoff lanes, checkpoints, lane conflicts and legacy sessions.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Row};

use engram_domain::handoff::{
    HandoffCheckpoint, HandoffLane, HandoffSession, LaneConflictRecord, LaneState, LaneStatus,
    MergeConflict,
};

use crate::error::Result;
use crate::{dt_to_text, from_json_text, opt_dt_to_text, text_to_dt, text_to_opt_dt, to_json_text, Store};

/// Partial lane update. `bump_version` increments `version` atomically in
/// SQL so the persisted sequence is strictly increasing no matter how many
/// writers race.
#[derive(Debug, Clone, Default)]
pub struct LaneUpdate {
    pub status: Option<LaneStatus>,
    pub objective: Option<String>,
    pub current_state: Option<LaneState>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub namespace: Option<String>,
    pub confidentiality_scope: Option<String>,
    pub repo_id: Option<String>,
    pub repo_path: Option<String>,
    pub branch: Option<String>,
    pub bump_version: bool,
}

const LANE_COLUMNS: &str = "id, user_id, repo_id, repo_path, branch, lane_type, status, \
     objective, current_state, namespace, confidentiality_scope, last_checkpoint_at, version, \
     created_at, updated_at";

fn row_to_lane(row: &Row<'_>) -> rusqlite::Result<HandoffLane> {
    Ok(HandoffLane {
        id: row.get(0)?,
        user_id: row.get(1)?,
        repo_id: row.get(2)?,
        repo_path: row.get(3)?,
        branch: row.get(4)?,
        lane_type: row
            .get::<_, Option<String>>(5)?
            .unwrap_or_else(|| "general".into()),
        status: LaneStatus::parse_or(&row.get::<_, String>(6)?, LaneStatus::Active),
        objective: row.get(7)?,
        current_state: from_json_text(row.get(8)?),
        namespace: row
            .get::<_, Option<String>>(9)?
            .unwrap_or_else(|| "default".into()),
        confidentiality_scope: row
            .get::<_, Option<String>>(10)?
            .unwrap_or_else(|| "work".into()),
        last_checkpoint_at: text_to_dt(row.get(11)?),
        version: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
        created_at: text_to_dt(row.get(13)?),
        updated_at: text_to_dt(row.get(14)?),
    })
}

const CHECKPOINT_COLUMNS: &str = "id, lane_id, user_id, agent_id, agent_role, event_type, \
     task_summary, decisions_made, files_touched, todos_remaining, blockers, key_commands, \
     test_results, merge_conflicts, context_snapshot, created_at";

fn row_to_checkpoint(row: &Row<'_>) -> rusqlite::Result<HandoffCheckpoint> {
    let merge_conflicts: Vec<MergeConflict> = from_json_text(row.get(13)?);
    Ok(HandoffCheckpoint {
        id: row.get(0)?,
        lane_id: row.get(1)?,
        user_id: row.get(2)?,
        agent_id: row.get(3)?,
        agent_role: row.get(4)?,
        event_type: row
            .get::<_, Option<String>>(5)?
            .unwrap_or_else(|| "tool_complete".into()),
        task_summary: row.get(6)?,
        state: LaneState {
            task_summary: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            decisions_made: from_json_text(row.get(7)?),
            files_touched: from_json_text(row.get(8)?),
            todos_remaining: from_json_text(row.get(9)?),
            blockers: from_json_text(row.get(10)?),
            key_commands: from_json_text(row.get(11)?),
            test_results: from_json_text(row.get(12)?),
            context_snapshot: row.get(14)?,
        },
        merge_conflicts,
        created_at: text_to_dt(row.get(15)?),
    })
}

const SESSION_COLUMNS: &str = "id, user_id, agent_id, repo, repo_id, status, task_summary, \
     decisions_made, files_touched, todos_remaining, blockers, key_commands, test_results, \
     context_snapshot, linked_memory_ids, linked_scene_ids, lane_id, namespace, \
     confidentiality_scope, started_at, ended_at, last_checkpoint_at";

fn row_to_handoff_session(row: &Row<'_>) -> rusqlite::Result<HandoffSession> {
    Ok(HandoffSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        repo: row.get(3)?,
        repo_id: row.get(4)?,
        status: LaneStatus::parse_or(&row.get::<_, String>(5)?, LaneStatus::Paused),
        task_summary: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        decisions_made: from_json_text(row.get(7)?),
        files_touched: from_json_text(row.get(8)?),
        todos_remaining: from_json_text(row.get(9)?),
        blockers: from_json_text(row.get(10)?),
        key_commands: from_json_text(row.get(11)?),
        test_results: from_json_text(row.get(12)?),
        context_snapshot: row.get(13)?,
        linked_memory_ids: from_json_text(row.get(14)?),
        linked_scene_ids: from_json_text(row.get(15)?),
        lane_id: row.get(16)?,
        namespace: row
            .get::<_, Option<String>>(17)?
            .unwrap_or_else(|| "default".into()),
        confidentiality_scope: row
            .get::<_, Option<String>>(18)?
            .unwrap_or_else(|| "work".into()),
        started_at: text_to_dt(row.get(19)?),
        ended_at: text_to_opt_dt(row.get(20)?),
        last_checkpoint_at: text_to_dt(row.get(21)?),
    })
}

fn status_filter(
    sql: &mut String,
    values: &mut Vec<SqlValue>,
    statuses: Option<&[LaneStatus]>,
) -> bool {
    match statuses {
        None => true,
        Some([]) => false, // explicit empty filter matches nothing
        Some(list) => {
            let placeholders = std::iter::repeat("?")
                .take(list.len())
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
            for status in list {
                values.push(status.as_str().to_string().into());
            }
            true
        }
    }
}

impl Store {
    // ── Lanes ────────────────────────────────────────────────────────

    pub fn add_lane(&self, lane: &HandoffLane) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO handoff_lanes
                     (id, user_id, repo_id, repo_path, branch, lane_type, status, objective,
                      current_state, namespace, confidentiality_scope, last_checkpoint_at,
                      version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    lane.id,
                    lane.user_id,
                    lane.repo_id,
                    lane.repo_path,
                    lane.branch,
                    lane.lane_type,
                    lane.status.as_str(),
                    lane.objective,
                    to_json_text(&lane.current_state),
                    lane.namespace,
                    lane.confidentiality_scope,
                    dt_to_text(lane.last_checkpoint_at),
                    lane.version,
                    dt_to_text(lane.created_at),
                    dt_to_text(lane.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_lane(&self, lane_id: &str) -> Result<Option<HandoffLane>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {LANE_COLUMNS} FROM handoff_lanes WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![lane_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_lane(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_lanes(
        &self,
        user_id: &str,
        repo_id: Option<&str>,
        statuses: Option<&[LaneStatus]>,
        limit: usize,
    ) -> Result<Vec<HandoffLane>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {LANE_COLUMNS} FROM handoff_lanes WHERE user_id = ?");
            let mut values: Vec<SqlValue> = vec![user_id.to_string().into()];
            if let Some(repo_id) = repo_id {
                sql.push_str(" AND repo_id = ?");
                values.push(repo_id.to_string().into());
            }
            if !status_filter(&mut sql, &mut values, statuses) {
                return Ok(Vec::new());
            }
            sql.push_str(" ORDER BY last_checkpoint_at DESC, created_at DESC LIMIT ?");
            values.push((limit as i64).into());

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_lane)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Apply a lane update. With `expected_version`, this is an optimistic
    /// CAS that fails (returns false) when another writer got there first.
    pub fn update_lane(
        &self,
        lane_id: &str,
        update: &LaneUpdate,
        expected_version: Option<i64>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let mut clauses: Vec<String> = vec!["updated_at = ?".into()];
            let mut values: Vec<SqlValue> = vec![dt_to_text(Utc::now()).into()];

            if let Some(status) = update.status {
                clauses.push("status = ?".into());
                values.push(status.as_str().to_string().into());
            }
            if let Some(objective) = &update.objective {
                clauses.push("objective = ?".into());
                values.push(objective.clone().into());
            }
            if let Some(state) = &update.current_state {
                clauses.push("current_state = ?".into());
                values.push(to_json_text(state).into());
            }
            if let Some(at) = update.last_checkpoint_at {
                clauses.push("last_checkpoint_at = ?".into());
                values.push(dt_to_text(at).into());
            }
            if let Some(namespace) = &update.namespace {
                clauses.push("namespace = ?".into());
                values.push(namespace.clone().into());
            }
            if let Some(scope) = &update.confidentiality_scope {
                clauses.push("confidentiality_scope = ?".into());
                values.push(scope.clone().into());
            }
            if let Some(repo_id) = &update.repo_id {
                clauses.push("repo_id = ?".into());
                values.push(repo_id.clone().into());
            }
            if let Some(repo_path) = &update.repo_path {
                clauses.push("repo_path = ?".into());
                values.push(repo_path.clone().into());
            }
            if let Some(branch) = &update.branch {
                clauses.push("branch = ?".into());
                values.push(branch.clone().into());
            }
            if update.bump_version {
                clauses.push("version = version + 1".into());
            }

            let mut sql = format!(
                "UPDATE handoff_lanes SET {} WHERE id = ?",
                clauses.join(", ")
            );
            values.push(lane_id.to_string().into());
            if let Some(expected) = expected_version {
                sql.push_str(" AND version = ?");
                values.push(expected.into());
            }
            Ok(conn.execute(&sql, params_from_iter(values))? > 0)
        })
    }

    /// Drop a user's oldest lanes beyond `max_lanes`, with their
    /// checkpoints, junctions and conflict rows.
    pub fn prune_lanes(&self, user_id: &str, max_lanes: usize) -> Result<usize> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT id FROM handoff_lanes WHERE user_id = ?1
                 ORDER BY last_checkpoint_at DESC, created_at DESC",
            )?;
            let ids: Vec<String> = stmt
                .query_map(params![user_id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            drop(stmt);

            let excess: Vec<&String> = ids.iter().skip(max_lanes).collect();
            for lane_id in &excess {
                tx.execute(
                    "DELETE FROM handoff_checkpoint_memories WHERE checkpoint_id IN
                         (SELECT id FROM handoff_checkpoints WHERE lane_id = ?1)",
                    params![lane_id],
                )?;
                tx.execute(
                    "DELETE FROM handoff_checkpoint_scenes WHERE checkpoint_id IN
                         (SELECT id FROM handoff_checkpoints WHERE lane_id = ?1)",
                    params![lane_id],
                )?;
                tx.execute(
                    "DELETE FROM handoff_lane_conflicts WHERE lane_id = ?1",
                    params![lane_id],
                )?;
                tx.execute(
                    "DELETE FROM handoff_checkpoints WHERE lane_id = ?1",
                    params![lane_id],
                )?;
                tx.execute("DELETE FROM handoff_lanes WHERE id = ?1", params![lane_id])?;
            }
            Ok(excess.len())
        })
    }

    // ── Checkpoints ──────────────────────────────────────────────────

    pub fn add_checkpoint(&self, checkpoint: &HandoffCheckpoint) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO handoff_checkpoints
                     (id, lane_id, user_id, agent_id, agent_role, event_type, task_summary,
                      decisions_made, files_touched, todos_remaining, blockers, key_commands,
                      test_results, merge_conflicts, context_snapshot, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    checkpoint.id,
                    checkpoint.lane_id,
                    checkpoint.user_id,
                    checkpoint.agent_id,
                    checkpoint.agent_role,
                    checkpoint.event_type,
                    checkpoint.task_summary,
                    to_json_text(&checkpoint.state.decisions_made),
                    to_json_text(&checkpoint.state.files_touched),
                    to_json_text(&checkpoint.state.todos_remaining),
                    to_json_text(&checkpoint.state.blockers),
                    to_json_text(&checkpoint.state.key_commands),
                    to_json_text(&checkpoint.state.test_results),
                    to_json_text(&checkpoint.merge_conflicts),
                    checkpoint.state.context_snapshot,
                    dt_to_text(checkpoint.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_latest_checkpoint(&self, lane_id: &str) -> Result<Option<HandoffCheckpoint>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHECKPOINT_COLUMNS} FROM handoff_checkpoints
                 WHERE lane_id = ?1 ORDER BY created_at DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![lane_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_checkpoint(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_checkpoints(&self, lane_id: &str, limit: usize) -> Result<Vec<HandoffCheckpoint>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHECKPOINT_COLUMNS} FROM handoff_checkpoints
                 WHERE lane_id = ?1 ORDER BY created_at DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![lane_id, limit as i64], row_to_checkpoint)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Remove a lane's oldest checkpoints beyond `max_checkpoints`.
    pub fn prune_checkpoints(&self, lane_id: &str, max_checkpoints: usize) -> Result<usize> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT id FROM handoff_checkpoints WHERE lane_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let ids: Vec<String> = stmt
                .query_map(params![lane_id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            drop(stmt);

            let excess: Vec<&String> = ids.iter().skip(max_checkpoints).collect();
            for checkpoint_id in &excess {
                tx.execute(
                    "DELETE FROM handoff_checkpoint_memories WHERE checkpoint_id = ?1",
                    params![checkpoint_id],
                )?;
                tx.execute(
                    "DELETE FROM handoff_checkpoint_scenes WHERE checkpoint_id = ?1",
                    params![checkpoint_id],
                )?;
                tx.execute(
                    "DELETE FROM handoff_checkpoints WHERE id = ?1",
                    params![checkpoint_id],
                )?;
            }
            Ok(excess.len())
        })
    }

    pub fn add_checkpoint_memory(
        &self,
        checkpoint_id: &str,
        memory_id: &str,
        relevance_score: f64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO handoff_checkpoint_memories
                     (checkpoint_id, memory_id, relevance_score)
                 VALUES (?1, ?2, ?3)",
                params![checkpoint_id, memory_id, relevance_score],
            )?;
            Ok(())
        })
    }

    pub fn add_checkpoint_scene(
        &self,
        checkpoint_id: &str,
        scene_id: &str,
        relevance_score: f64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO handoff_checkpoint_scenes
                     (checkpoint_id, scene_id, relevance_score)
                 VALUES (?1, ?2, ?3)",
                params![checkpoint_id, scene_id, relevance_score],
            )?;
            Ok(())
        })
    }

    pub fn get_checkpoint_memory_ids(&self, checkpoint_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id FROM handoff_checkpoint_memories
                 WHERE checkpoint_id = ?1 ORDER BY relevance_score DESC",
            )?;
            let rows = stmt.query_map(params![checkpoint_id], |row| row.get(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn get_checkpoint_scene_ids(&self, checkpoint_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT scene_id FROM handoff_checkpoint_scenes
                 WHERE checkpoint_id = ?1 ORDER BY relevance_score DESC",
            )?;
            let rows = stmt.query_map(params![checkpoint_id], |row| row.get(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    // ── Lane conflicts ───────────────────────────────────────────────

    pub fn add_lane_conflict(&self, conflict: &LaneConflictRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO handoff_lane_conflicts
                     (id, lane_id, checkpoint_id, user_id, conflict_fields, previous_state,
                      incoming_state, resolved_state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    conflict.id,
                    conflict.lane_id,
                    conflict.checkpoint_id,
                    conflict.user_id,
                    to_json_text(&conflict.conflict_fields),
                    to_json_text(&conflict.previous_state),
                    to_json_text(&conflict.incoming_state),
                    to_json_text(&conflict.resolved_state),
                    dt_to_text(conflict.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_lane_conflicts(&self, lane_id: &str, limit: usize) -> Result<Vec<LaneConflictRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, lane_id, checkpoint_id, user_id, conflict_fields, previous_state,
                        incoming_state, resolved_state, created_at
                 FROM handoff_lane_conflicts
                 WHERE lane_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![lane_id, limit as i64], |row| {
                Ok(LaneConflictRecord {
                    id: row.get(0)?,
                    lane_id: row.get(1)?,
                    checkpoint_id: row.get(2)?,
                    user_id: row.get(3)?,
                    conflict_fields: from_json_text(row.get(4)?),
                    previous_state: row
                        .get::<_, Option<String>>(5)?
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                    incoming_state: row
                        .get::<_, Option<String>>(6)?
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                    resolved_state: row
                        .get::<_, Option<String>>(7)?
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                    created_at: text_to_dt(row.get(8)?),
                })
            })?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    // ── Legacy handoff sessions ──────────────────────────────────────

    pub fn add_handoff_session(&self, session: &HandoffSession) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO handoff_sessions
                     (id, user_id, agent_id, repo, repo_id, status, task_summary, decisions_made,
                      files_touched, todos_remaining, blockers, key_commands, test_results,
                      context_snapshot, linked_memory_ids, linked_scene_ids, lane_id, namespace,
                      confidentiality_scope, started_at, ended_at, last_checkpoint_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21, ?22)",
                params![
                    session.id,
                    session.user_id,
                    session.agent_id,
                    session.repo,
                    session.repo_id,
                    session.status.as_str(),
                    session.task_summary,
                    to_json_text(&session.decisions_made),
                    to_json_text(&session.files_touched),
                    to_json_text(&session.todos_remaining),
                    to_json_text(&session.blockers),
                    to_json_text(&session.key_commands),
                    to_json_text(&session.test_results),
                    session.context_snapshot,
                    to_json_text(&session.linked_memory_ids),
                    to_json_text(&session.linked_scene_ids),
                    session.lane_id,
                    session.namespace,
                    session.confidentiality_scope,
                    dt_to_text(session.started_at),
                    opt_dt_to_text(session.ended_at),
                    dt_to_text(session.last_checkpoint_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_handoff_session(&self, session_id: &str) -> Result<Option<HandoffSession>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM handoff_sessions WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_handoff_session(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_handoff_sessions(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo_id: Option<&str>,
        statuses: Option<&[LaneStatus]>,
        limit: usize,
    ) -> Result<Vec<HandoffSession>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {SESSION_COLUMNS} FROM handoff_sessions WHERE user_id = ?");
            let mut values: Vec<SqlValue> = vec![user_id.to_string().into()];
            if let Some(agent_id) = agent_id {
                sql.push_str(" AND agent_id = ?");
                values.push(agent_id.to_string().into());
            }
            if let Some(repo_id) = repo_id {
                sql.push_str(" AND repo_id = ?");
                values.push(repo_id.to_string().into());
            }
            if !status_filter(&mut sql, &mut values, statuses) {
                return Ok(Vec::new());
            }
            sql.push_str(" ORDER BY last_checkpoint_at DESC, started_at DESC LIMIT ?");
            values.push((limit as i64).into());

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_handoff_session)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn get_last_handoff_session(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo_id: Option<&str>,
        statuses: Option<&[LaneStatus]>,
    ) -> Result<Option<HandoffSession>> {
        Ok(self
            .list_handoff_sessions(user_id, agent_id, repo_id, statuses, 1)?
            .into_iter()
            .next())
    }

    pub fn prune_handoff_sessions(&self, user_id: &str, max_sessions: usize) -> Result<usize> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT id FROM handoff_sessions WHERE user_id = ?1
                 ORDER BY last_checkpoint_at DESC, started_at DESC",
            )?;
            let ids: Vec<String> = stmt
                .query_map(params![user_id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            drop(stmt);

            let excess: Vec<&String> = ids.iter().skip(max_sessions).collect();
            for session_id in &excess {
                tx.execute(
                    "DELETE FROM handoff_sessions WHERE id = ?1",
                    params![session_id],
                )?;
            }
            Ok(excess.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane(user: &str, repo_id: Option<&str>) -> HandoffLane {
        let now = Utc::now();
        HandoffLane {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.into(),
            repo_id: repo_id.map(String::from),
            repo_path: Some("/p".into()),
            branch: Some("main".into()),
            lane_type: "general".into(),
            status: LaneStatus::Active,
            objective: Some("ship the parser".into()),
            current_state: LaneState::default(),
            namespace: "default".into(),
            confidentiality_scope: "work".into(),
            last_checkpoint_at: now,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn optimistic_cas_rejects_stale_version() {
        let store = Store::open_in_memory().unwrap();
        let l = lane("u1", Some("git:abc"));
        store.add_lane(&l).unwrap();

        let update = LaneUpdate {
            bump_version: true,
            ..Default::default()
        };
        // First writer with version 0 wins.
        assert!(store.update_lane(&l.id, &update, Some(0)).unwrap());
        // Second writer with the same expected version loses.
        assert!(!store.update_lane(&l.id, &update, Some(0)).unwrap());

        let got = store.get_lane(&l.id).unwrap().unwrap();
        assert_eq!(got.version, 1);

        // Unconditional bump still strictly increases.
        assert!(store.update_lane(&l.id, &update, None).unwrap());
        assert_eq!(store.get_lane(&l.id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn empty_status_filter_matches_nothing() {
        let store = Store::open_in_memory().unwrap();
        store.add_lane(&lane("u1", None)).unwrap();
        assert!(store.list_lanes("u1", None, Some(&[]), 10).unwrap().is_empty());
        assert_eq!(store.list_lanes("u1", None, None, 10).unwrap().len(), 1);
        assert_eq!(
            store
                .list_lanes("u1", None, Some(&[LaneStatus::Active]), 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn checkpoint_pruning_keeps_newest() {
        let store = Store::open_in_memory().unwrap();
        let l = lane("u1", None);
        store.add_lane(&l).unwrap();

        for i in 0..5 {
            let cp = HandoffCheckpoint {
                id: format!("cp-{i}"),
                lane_id: l.id.clone(),
                user_id: "u1".into(),
                agent_id: "agent-a".into(),
                agent_role: None,
                event_type: "tool_complete".into(),
                task_summary: Some(format!("step {i}")),
                state: LaneState::default(),
                merge_conflicts: vec![],
                created_at: Utc::now() + chrono::Duration::seconds(i),
            };
            store.add_checkpoint(&cp).unwrap();
        }

        let pruned = store.prune_checkpoints(&l.id, 2).unwrap();
        assert_eq!(pruned, 3);
        let left = store.list_checkpoints(&l.id, 10).unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].id, "cp-4");
    }

    #[test]
    fn lane_pruning_cascades() {
        let store = Store::open_in_memory().unwrap();
        for _ in 0..3 {
            store.add_lane(&lane("u1", None)).unwrap();
        }
        let pruned = store.prune_lanes("u1", 1).unwrap();
        assert_eq!(pruned, 2);
        assert_eq!(store.list_lanes("u1", None, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn legacy_session_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let s = HandoffSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            agent_id: "claude-code".into(),
            repo: Some("/p".into()),
            repo_id: Some("path:xyz".into()),
            status: LaneStatus::Paused,
            task_summary: "left off mid-refactor".into(),
            decisions_made: vec!["use sqlite".into()],
            files_touched: vec![],
            todos_remaining: vec!["wire tests".into()],
            blockers: vec![],
            key_commands: vec![],
            test_results: vec![],
            context_snapshot: None,
            linked_memory_ids: vec![],
            linked_scene_ids: vec![],
            lane_id: None,
            started_at: now,
            ended_at: None,
            last_checkpoint_at: now,
            namespace: "default".into(),
            confidentiality_scope: "work".into(),
        };
        store.add_handoff_session(&s).unwrap();

        let last = store
            .get_last_handoff_session("u1", Some("claude-code"), None, Some(&[LaneStatus::Paused]))
            .unwrap()
            .unwrap();
        assert_eq!(last.task_summary, "left off mid-refactor");
        assert!(store
            .get_last_handoff_session("u1", None, None, Some(&[LaneStatus::Completed]))
            .unwrap()
            .is_none());
    }
}
