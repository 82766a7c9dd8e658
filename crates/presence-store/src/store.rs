use std::path::{Path, PathBuf};

use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::schema;

/// One SQLite connection. Not `Sync`: concurrent callers each open their own
/// via [`Store::connect`] and rely on WAL plus row-level atomic statements.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

/// Row counts per collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub open_loops: u64,
    pub terminal_loops: u64,
    pub relationships: u64,
    pub events: u64,
    pub insights: u64,
    pub active_threads: u64,
}

impl Store {
    /// Open (creating if needed) and migrate the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Additional connection to an already-initialized database file.
    pub fn connect(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::configure(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // --- Cross-collection queries ---

    /// Every user with an open loop or a relationship.
    pub fn known_users(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM open_loops WHERE status IN ('active', 'surfaced')
             UNION
             SELECT user_id FROM relationship_state
             ORDER BY 1",
        )?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(users)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreStats {
            open_loops: count("SELECT COUNT(*) FROM open_loops WHERE status IN ('active', 'surfaced')")?,
            terminal_loops: count(
                "SELECT COUNT(*) FROM open_loops WHERE status NOT IN ('active', 'surfaced')",
            )?,
            relationships: count("SELECT COUNT(*) FROM relationship_state")?,
            events: count("SELECT COUNT(*) FROM relationship_events")?,
            insights: count("SELECT COUNT(*) FROM insight_records")?,
            active_threads: count("SELECT COUNT(*) FROM ongoing_threads WHERE status = 'active'")?,
        })
    }
}

// --- Row helpers shared by the collection modules ---

pub(crate) fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

pub(crate) fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, format!("invalid UUID {s}: {e}")))
}

/// Decode a text column through an enum's `parse`.
pub(crate) fn get_enum<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| conversion_error(idx, format!("unknown value {s:?}")))
}

/// `?, ?, ?` with `n` placeholders starting at `?{first}`.
pub(crate) fn placeholders(first: usize, n: usize) -> String {
    (first..first + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
