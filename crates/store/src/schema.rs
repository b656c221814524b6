//! Schema migrations and boot-time backfills.
//!
//! Migrations are idempotent, additive and safe to re-run: each versioned
//! DDL block runs once (recorded in `schema_migrations`), column additions
//! tolerate pre-existing columns, and backfills use `INSERT OR IGNORE`.
//! Everything executes inside a single write transaction on boot.

use regex::Regex;
use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    memory TEXT NOT NULL,
    user_id TEXT NOT NULL,
    agent_id TEXT,
    app_id TEXT,
    run_id TEXT,
    source_app TEXT,
    source_type TEXT,
    source_event_id TEXT,
    memory_type TEXT DEFAULT 'semantic' CHECK (memory_type IN ('episodic', 'semantic')),
    layer TEXT DEFAULT 'sml' CHECK (layer IN ('sml', 'lml')),
    namespace TEXT DEFAULT 'default',
    confidentiality_scope TEXT DEFAULT 'work',
    sensitivity TEXT DEFAULT 'normal',
    importance REAL DEFAULT 0.5,
    immutable INTEGER DEFAULT 0,
    tombstone INTEGER DEFAULT 0,
    strength REAL DEFAULT 1.0,
    s_fast REAL DEFAULT 1.0,
    s_mid REAL DEFAULT 1.0,
    s_slow REAL DEFAULT 1.0,
    access_count INTEGER DEFAULT 0,
    last_accessed TEXT DEFAULT CURRENT_TIMESTAMP,
    decay_lambda REAL DEFAULT 0.0,
    categories TEXT DEFAULT '[]',
    scene_id TEXT,
    related_memories TEXT DEFAULT '[]',
    source_memories TEXT DEFAULT '[]',
    metadata TEXT DEFAULT '{}',
    embedding TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_memories_user_layer ON memories(user_id, layer);
CREATE INDEX IF NOT EXISTS idx_memories_strength ON memories(strength DESC);
CREATE INDEX IF NOT EXISTS idx_memories_tombstone ON memories(tombstone);
CREATE INDEX IF NOT EXISTS idx_memories_namespace ON memories(user_id, namespace);
CREATE INDEX IF NOT EXISTS idx_memories_source_event ON memories(agent_id, source_event_id);

CREATE TABLE IF NOT EXISTS memory_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL,
    event TEXT NOT NULL,
    details TEXT DEFAULT '{}',
    timestamp TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_history_memory ON memory_history(memory_id);

CREATE TABLE IF NOT EXISTS decay_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_at TEXT DEFAULT CURRENT_TIMESTAMP,
    memories_decayed INTEGER,
    memories_forgotten INTEGER,
    memories_promoted INTEGER
);

CREATE TABLE IF NOT EXISTS scenes (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT,
    summary TEXT,
    topic TEXT,
    location TEXT,
    participants TEXT DEFAULT '[]',
    memory_ids TEXT DEFAULT '[]',
    start_time TEXT NOT NULL,
    end_time TEXT,
    embedding TEXT,
    strength REAL DEFAULT 1.0,
    access_count INTEGER DEFAULT 0,
    namespace TEXT DEFAULT 'default',
    tombstone INTEGER DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_scenes_user ON scenes(user_id);
CREATE INDEX IF NOT EXISTS idx_scenes_start ON scenes(start_time DESC);

CREATE TABLE IF NOT EXISTS scene_memories (
    scene_id TEXT NOT NULL,
    memory_id TEXT NOT NULL,
    position INTEGER DEFAULT 0,
    PRIMARY KEY (scene_id, memory_id)
);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    profile_type TEXT DEFAULT 'contact' CHECK (profile_type IN ('self', 'contact', 'entity')),
    narrative TEXT,
    facts TEXT DEFAULT '[]',
    preferences TEXT DEFAULT '[]',
    relationships TEXT DEFAULT '[]',
    aliases TEXT DEFAULT '[]',
    embedding TEXT,
    strength REAL DEFAULT 1.0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_profiles_user ON profiles(user_id);
CREATE INDEX IF NOT EXISTS idx_profiles_name ON profiles(name);

CREATE TABLE IF NOT EXISTS profile_memories (
    profile_id TEXT NOT NULL,
    memory_id TEXT NOT NULL,
    role TEXT DEFAULT 'mentioned' CHECK (role IN ('subject', 'mentioned', 'about')),
    PRIMARY KEY (profile_id, memory_id)
);
"#;

/// Versioned v2 blocks, applied once each in order.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "v2_001",
        r#"
        CREATE TABLE IF NOT EXISTS views (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT,
            timestamp TEXT NOT NULL,
            place_type TEXT,
            place_value TEXT,
            topic_label TEXT,
            raw_text TEXT,
            signals TEXT DEFAULT '{}',
            scene_id TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_views_user_time ON views(user_id, timestamp DESC);
        "#,
    ),
    (
        "v2_002",
        r#"
        CREATE TABLE IF NOT EXISTS proposal_commits (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT,
            scope TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (status IN ('PENDING', 'AUTO_STASHED', 'APPROVED', 'REJECTED')),
            checks TEXT DEFAULT '{}',
            preview TEXT DEFAULT '{}',
            provenance TEXT DEFAULT '{}',
            source_event_id TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_proposal_commits_user ON proposal_commits(user_id);
        CREATE INDEX IF NOT EXISTS idx_proposal_commits_status ON proposal_commits(status);
        CREATE INDEX IF NOT EXISTS idx_proposal_commits_source_event
            ON proposal_commits(agent_id, source_event_id);

        CREATE TABLE IF NOT EXISTS proposal_changes (
            id TEXT PRIMARY KEY,
            commit_id TEXT NOT NULL,
            op TEXT NOT NULL CHECK (op IN ('ADD', 'UPDATE', 'DELETE')),
            target TEXT NOT NULL,
            target_id TEXT,
            patch TEXT DEFAULT '{}',
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (commit_id) REFERENCES proposal_commits(id)
        );
        CREATE INDEX IF NOT EXISTS idx_proposal_changes_commit ON proposal_changes(commit_id);
        "#,
    ),
    (
        "v2_003",
        r#"
        CREATE TABLE IF NOT EXISTS conflict_stash (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            conflict_key TEXT NOT NULL,
            existing TEXT DEFAULT '{}',
            proposed TEXT DEFAULT '{}',
            resolution TEXT NOT NULL DEFAULT 'UNRESOLVED'
                CHECK (resolution IN ('UNRESOLVED', 'KEEP_EXISTING', 'ACCEPT_PROPOSED', 'KEEP_BOTH')),
            source_commit_id TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            resolved_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_conflict_stash_user ON conflict_stash(user_id);
        CREATE INDEX IF NOT EXISTS idx_conflict_stash_resolution ON conflict_stash(resolution);
        "#,
    ),
    (
        "v2_004",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            token_hash TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            agent_id TEXT,
            allowed_confidentiality_scopes TEXT,
            capabilities TEXT DEFAULT '[]',
            namespaces TEXT DEFAULT '["*"]',
            expires_at TEXT NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            revoked_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
        "#,
    ),
    (
        "v2_005",
        r#"
        CREATE TABLE IF NOT EXISTS memory_refcounts (
            memory_id TEXT PRIMARY KEY,
            strong_count INTEGER DEFAULT 0,
            weak_count INTEGER DEFAULT 0,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS memory_subscribers (
            id TEXT PRIMARY KEY,
            memory_id TEXT NOT NULL,
            subscriber TEXT NOT NULL,
            ref_type TEXT NOT NULL CHECK (ref_type IN ('strong', 'weak')),
            expires_at TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (memory_id, subscriber, ref_type)
        );
        CREATE INDEX IF NOT EXISTS idx_subscribers_memory ON memory_subscribers(memory_id);
        CREATE INDEX IF NOT EXISTS idx_subscribers_expiry ON memory_subscribers(expires_at);
        "#,
    ),
    (
        "v2_006",
        r#"
        CREATE TABLE IF NOT EXISTS daily_digests (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            digest_date TEXT NOT NULL,
            payload TEXT DEFAULT '{}',
            generated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, digest_date)
        );
        "#,
    ),
    (
        "v2_007",
        r#"
        CREATE TABLE IF NOT EXISTS invariants (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            invariant_key TEXT NOT NULL,
            invariant_value TEXT NOT NULL,
            category TEXT DEFAULT 'identity',
            confidence REAL DEFAULT 0.0,
            source_memory_id TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, invariant_key)
        );
        CREATE INDEX IF NOT EXISTS idx_invariants_user ON invariants(user_id);
        "#,
    ),
    (
        "v2_008",
        r#"
        CREATE TABLE IF NOT EXISTS agent_trust (
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            total_proposals INTEGER DEFAULT 0,
            approved_proposals INTEGER DEFAULT 0,
            rejected_proposals INTEGER DEFAULT 0,
            auto_stashed_proposals INTEGER DEFAULT 0,
            last_proposed_at TEXT,
            last_approved_at TEXT,
            trust_score REAL DEFAULT 0.0,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, agent_id)
        );
        "#,
    ),
    (
        "v2_009",
        r#"
        CREATE TABLE IF NOT EXISTS namespaces (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, name)
        );

        CREATE TABLE IF NOT EXISTS namespace_permissions (
            id TEXT PRIMARY KEY,
            namespace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            capability TEXT NOT NULL,
            granted_at TEXT DEFAULT CURRENT_TIMESTAMP,
            expires_at TEXT,
            FOREIGN KEY (namespace_id) REFERENCES namespaces(id),
            UNIQUE (namespace_id, user_id, agent_id, capability)
        );
        CREATE INDEX IF NOT EXISTS idx_ns_permissions_agent ON namespace_permissions(user_id, agent_id);
        "#,
    ),
    (
        "v2_010",
        r#"
        CREATE TABLE IF NOT EXISTS agent_policies (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            allowed_confidentiality_scopes TEXT DEFAULT '[]',
            allowed_capabilities TEXT DEFAULT '[]',
            allowed_namespaces TEXT DEFAULT '[]',
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, agent_id)
        );
        CREATE INDEX IF NOT EXISTS idx_agent_policies_user ON agent_policies(user_id);
        "#,
    ),
    (
        "v2_011",
        r#"
        CREATE TABLE IF NOT EXISTS handoff_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            repo TEXT,
            repo_id TEXT,
            status TEXT NOT NULL DEFAULT 'paused'
                CHECK (status IN ('active', 'paused', 'completed', 'abandoned')),
            task_summary TEXT NOT NULL DEFAULT '',
            decisions_made TEXT DEFAULT '[]',
            files_touched TEXT DEFAULT '[]',
            todos_remaining TEXT DEFAULT '[]',
            blockers TEXT DEFAULT '[]',
            key_commands TEXT DEFAULT '[]',
            test_results TEXT DEFAULT '[]',
            context_snapshot TEXT,
            linked_memory_ids TEXT DEFAULT '[]',
            linked_scene_ids TEXT DEFAULT '[]',
            lane_id TEXT,
            namespace TEXT DEFAULT 'default',
            confidentiality_scope TEXT DEFAULT 'work',
            started_at TEXT DEFAULT CURRENT_TIMESTAMP,
            ended_at TEXT,
            last_checkpoint_at TEXT DEFAULT CURRENT_TIMESTAMP,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_handoff_sessions_user ON handoff_sessions(user_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_handoff_sessions_repo ON handoff_sessions(repo_id);
        "#,
    ),
    (
        "v2_012",
        r#"
        CREATE TABLE IF NOT EXISTS handoff_lanes (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            repo_id TEXT,
            repo_path TEXT,
            branch TEXT,
            lane_type TEXT DEFAULT 'general',
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'paused', 'completed', 'abandoned')),
            objective TEXT,
            current_state TEXT DEFAULT '{}',
            namespace TEXT DEFAULT 'default',
            confidentiality_scope TEXT DEFAULT 'work',
            last_checkpoint_at TEXT DEFAULT CURRENT_TIMESTAMP,
            version INTEGER DEFAULT 0,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_handoff_lanes_user ON handoff_lanes(user_id);
        CREATE INDEX IF NOT EXISTS idx_handoff_lanes_repo ON handoff_lanes(repo_id);
        CREATE INDEX IF NOT EXISTS idx_handoff_lanes_recent
            ON handoff_lanes(last_checkpoint_at DESC, created_at DESC);

        CREATE TABLE IF NOT EXISTS handoff_checkpoints (
            id TEXT PRIMARY KEY,
            lane_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            agent_role TEXT,
            event_type TEXT DEFAULT 'tool_complete',
            task_summary TEXT,
            decisions_made TEXT DEFAULT '[]',
            files_touched TEXT DEFAULT '[]',
            todos_remaining TEXT DEFAULT '[]',
            blockers TEXT DEFAULT '[]',
            key_commands TEXT DEFAULT '[]',
            test_results TEXT DEFAULT '[]',
            merge_conflicts TEXT DEFAULT '[]',
            context_snapshot TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (lane_id) REFERENCES handoff_lanes(id)
        );
        CREATE INDEX IF NOT EXISTS idx_checkpoints_lane ON handoff_checkpoints(lane_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS handoff_checkpoint_memories (
            checkpoint_id TEXT NOT NULL,
            memory_id TEXT NOT NULL,
            relevance_score REAL DEFAULT 1.0,
            PRIMARY KEY (checkpoint_id, memory_id)
        );

        CREATE TABLE IF NOT EXISTS handoff_checkpoint_scenes (
            checkpoint_id TEXT NOT NULL,
            scene_id TEXT NOT NULL,
            relevance_score REAL DEFAULT 1.0,
            PRIMARY KEY (checkpoint_id, scene_id)
        );

        CREATE TABLE IF NOT EXISTS handoff_lane_conflicts (
            id TEXT PRIMARY KEY,
            lane_id TEXT NOT NULL,
            checkpoint_id TEXT,
            user_id TEXT NOT NULL,
            conflict_fields TEXT DEFAULT '[]',
            previous_state TEXT DEFAULT '{}',
            incoming_state TEXT DEFAULT '{}',
            resolved_state TEXT DEFAULT '{}',
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (lane_id) REFERENCES handoff_lanes(id)
        );
        CREATE INDEX IF NOT EXISTS idx_lane_conflicts_lane ON handoff_lane_conflicts(lane_id, created_at DESC);
        "#,
    ),
    (
        "v2_013",
        r#"
        CREATE TABLE IF NOT EXISTS distillation_runs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            episodes_sampled INTEGER DEFAULT 0,
            semantic_created INTEGER DEFAULT 0,
            semantic_deduplicated INTEGER DEFAULT 0,
            errors INTEGER DEFAULT 0,
            run_at TEXT DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS distillation_provenance (
            semantic_memory_id TEXT NOT NULL,
            episodic_memory_id TEXT NOT NULL,
            run_id TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (semantic_memory_id, episodic_memory_id)
        );
        "#,
    ),
];

pub(crate) fn run_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(BASE_SCHEMA)
        .map_err(|e| StoreError::MigrationFailed(format!("base schema: {e}")))?;

    for (version, ddl) in MIGRATIONS {
        let applied: bool = tx
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1",
                params![version],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if applied {
            continue;
        }
        tx.execute_batch(ddl)
            .map_err(|e| StoreError::MigrationFailed(format!("{version}: {e}")))?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations (version) VALUES (?1)",
            params![version],
        )?;
        tracing::info!(version = *version, "schema migration applied");
    }

    // Legacy column additions; harmless on fresh databases.
    add_column_if_missing(&tx, "memories", "source_event_id", "TEXT")?;
    add_column_if_missing(&tx, "memories", "sensitivity", "TEXT DEFAULT 'normal'")?;
    add_column_if_missing(&tx, "scenes", "namespace", "TEXT DEFAULT 'default'")?;
    add_column_if_missing(&tx, "sessions", "namespaces", "TEXT DEFAULT '[\"*\"]'")?;

    seed_default_namespaces(&tx)?;
    seed_identity_invariants(&tx)?;
    normalize_null_text(&tx)?;
    seed_refcounts(&tx)?;

    tx.commit()?;
    Ok(())
}

/// `ALTER TABLE ... ADD COLUMN`, swallowing "duplicate column" so re-runs
/// are no-ops.
fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    col_type: &str,
) -> Result<()> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {col_type}");
    match conn.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("duplicate column") => Ok(()),
        Err(e) => Err(StoreError::MigrationFailed(format!("{table}.{column}: {e}"))),
    }
}

/// Every user with any memory gets a `default` namespace row.
fn seed_default_namespaces(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT user_id FROM memories WHERE user_id IS NOT NULL AND user_id != ''",
    )?;
    let users: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for user_id in users {
        conn.execute(
            "INSERT OR IGNORE INTO namespaces (id, user_id, name, description)
             VALUES (?1, ?2, 'default', 'Default namespace')",
            params![uuid::Uuid::new_v4().to_string(), user_id],
        )?;
    }
    Ok(())
}

/// Bootstrap `identity.name` / `identity.primary_email` invariants from the
/// self profile and from memories matching first-person name/email patterns.
fn seed_identity_invariants(conn: &Connection) -> Result<()> {
    let name_re = Regex::new(r"(?i)\bmy name is ([A-Za-z][A-Za-z .'-]{0,60})").expect("static regex");
    let email_re = Regex::new(r"(?i)\bmy (?:primary )?email is ([\w.+-]+@[\w.-]+\.[A-Za-z]{2,})")
        .expect("static regex");

    let mut stmt = conn.prepare(
        "SELECT user_id, name FROM profiles WHERE profile_type = 'self' AND name != ''",
    )?;
    let selfs: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;
    for (user_id, name) in selfs {
        upsert_seed_invariant(conn, &user_id, "identity.name", name.trim(), 0.6, None)?;
    }

    let mut stmt = conn.prepare(
        "SELECT id, user_id, memory FROM memories WHERE tombstone = 0 AND memory LIKE '%my %'",
    )?;
    let rows: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<_, _>>()?;
    for (memory_id, user_id, content) in rows {
        if let Some(caps) = name_re.captures(&content) {
            upsert_seed_invariant(
                conn,
                &user_id,
                "identity.name",
                caps[1].trim(),
                0.8,
                Some(&memory_id),
            )?;
        }
        if let Some(caps) = email_re.captures(&content) {
            upsert_seed_invariant(
                conn,
                &user_id,
                "identity.primary_email",
                caps[1].trim(),
                0.8,
                Some(&memory_id),
            )?;
        }
    }
    Ok(())
}

fn upsert_seed_invariant(
    conn: &Connection,
    user_id: &str,
    key: &str,
    value: &str,
    confidence: f64,
    source_memory_id: Option<&str>,
) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    conn.execute(
        "INSERT OR IGNORE INTO invariants
             (id, user_id, invariant_key, invariant_value, category, confidence, source_memory_id)
         VALUES (?1, ?2, ?3, ?4, 'identity', ?5, ?6)",
        params![
            uuid::Uuid::new_v4().to_string(),
            user_id,
            key,
            value,
            confidence,
            source_memory_id
        ],
    )?;
    Ok(())
}

fn normalize_null_text(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE memories SET namespace = 'default' WHERE namespace IS NULL OR namespace = ''",
        [],
    )?;
    conn.execute(
        "UPDATE memories SET confidentiality_scope = 'work'
         WHERE confidentiality_scope IS NULL OR confidentiality_scope = ''",
        [],
    )?;
    conn.execute(
        "UPDATE memories SET categories = '[]' WHERE categories IS NULL",
        [],
    )?;
    conn.execute("UPDATE memories SET metadata = '{}' WHERE metadata IS NULL", [])?;
    Ok(())
}

/// Every memory gets a refcount row so ref-aware decay can join cheaply.
fn seed_refcounts(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO memory_refcounts (memory_id, strong_count, weak_count)
         SELECT id, 0, 0 FROM memories",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }

    #[test]
    fn add_column_tolerates_existing() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        add_column_if_missing(&conn, "memories", "source_event_id", "TEXT").unwrap();
    }

    #[test]
    fn backfill_seeds_namespace_and_refcount() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO memories (id, memory, user_id) VALUES ('m1', 'my name is Ada', 'u1')",
            [],
        )
        .unwrap();
        run_migrations(&mut conn).unwrap();

        let ns: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM namespaces WHERE user_id = 'u1' AND name = 'default'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(ns, 1);

        let rc: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memory_refcounts WHERE memory_id = 'm1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rc, 1);

        let inv: String = conn
            .query_row(
                "SELECT invariant_value FROM invariants
                 WHERE user_id = 'u1' AND invariant_key = 'identity.name'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(inv, "Ada");
    }
}
