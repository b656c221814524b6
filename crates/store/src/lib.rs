//! Durable, transactional row store for the Engram kernel.
//!
//! A single persistent writer (the mutex-guarded connection) with
//! write-ahead logging; readers share the same handle and never observe
//! torn rows. Every multi-statement write runs inside a transaction.
//!
//! Typed CRUD only: updates go through per-table field enums
//! ([`memories::MemoryField`] and friends) whose variants enumerate the
//! writable columns, so an invalid column is unrepresentable.

pub mod digests;
pub mod error;
pub mod handoff;
pub mod history;
pub mod memories;
pub mod namespaces;
pub mod profiles;
pub mod refcounts;
mod schema;
pub mod scenes;
pub mod sessions;
pub mod staging;
pub mod trust;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

pub use error::{Result, StoreError};
pub use memories::{MemoryField, MemoryQuery, TraceUpdate};
pub use scenes::SceneField;

/// The embedded relational store backing all kernel tables.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`, running all pending
    /// migrations and backfills inside a single write.
    pub fn open(path: &Path) -> Result<Store> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::MigrationFailed(format!("creating {parent:?}: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// In-memory store for tests; identical schema and semantics.
    pub fn open_in_memory() -> Result<Store> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Store> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Store {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        schema::run_migrations(&mut conn)
    }

    /// Run `f` against the shared connection. Single statements only;
    /// multi-statement writes go through [`Store::with_tx`].
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction; rolls back on error.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::from)?;
        let out = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }
}

// ── Column encoding helpers shared by the table modules ──────────────

pub(crate) fn to_json_text<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub(crate) fn from_json_text<T: serde::de::DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub(crate) fn dt_to_text(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn opt_dt_to_text(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(dt_to_text)
}

pub(crate) fn text_to_dt(raw: Option<String>) -> DateTime<Utc> {
    raw.and_then(|s| parse_dt(&s)).unwrap_or_else(Utc::now)
}

pub(crate) fn text_to_opt_dt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| parse_dt(&s))
}

/// Accepts RFC 3339 and the naive `YYYY-MM-DDTHH:MM:SS` shapes older rows
/// may carry.
pub(crate) fn parse_dt(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_migrates_in_memory() {
        let store = Store::open_in_memory().unwrap();
        // Re-running migrations is a no-op.
        store.run_migrations().unwrap();
        let versions = store
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT COUNT(*) FROM schema_migrations")?;
                Ok(stmt.query_row([], |row| row.get::<_, i64>(0))?)
            })
            .unwrap();
        assert!(versions >= 12);
    }

    #[test]
    fn opens_on_disk_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.db");
        {
            let _store = Store::open(&path).unwrap();
        }
        let _store = Store::open(&path).unwrap();
    }

    #[test]
    fn parses_naive_and_rfc3339_timestamps() {
        assert!(parse_dt("2025-06-01T10:00:00Z").is_some());
        assert!(parse_dt("2025-06-01T10:00:00.123456").is_some());
        assert!(parse_dt("2025-06-01 10:00:00").is_some());
        assert!(parse_dt("yesterday").is_none());
    }
}
