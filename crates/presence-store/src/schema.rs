use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: i64 = 1;

/// Per-connection settings. Every connection to a shared file needs these,
/// not just the one that created the schema.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    // Checkpoint every ~400KB instead of the default ~4MB
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;
    Ok(())
}

pub fn initialize(conn: &Connection) -> Result<()> {
    configure(conn)?;

    if let Some(found) = get_schema_version(conn)?
        && found > SCHEMA_VERSION
    {
        return Err(StoreError::InvalidData(format!(
            "database schema v{found} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS open_loops (
            id                    TEXT PRIMARY KEY,
            user_id               TEXT NOT NULL,
            kind                  TEXT NOT NULL,
            topic                 TEXT NOT NULL,
            trigger_context       TEXT NOT NULL DEFAULT '',
            suggested_phrasing    TEXT,
            salience              REAL NOT NULL CHECK (salience >= 0.0 AND salience <= 1.0),
            surface_count         INTEGER NOT NULL DEFAULT 0,
            max_surfaces          INTEGER NOT NULL CHECK (max_surfaces >= 1),
            created_at            INTEGER NOT NULL,
            should_surface_after  INTEGER NOT NULL,
            expires_at            INTEGER NOT NULL,
            last_surfaced_at      INTEGER,
            last_mentioned_at     INTEGER,
            status                TEXT NOT NULL,
            event_datetime        INTEGER,
            salience_decayed_days INTEGER NOT NULL DEFAULT 0,
            updated_at            INTEGER NOT NULL,
            CHECK (surface_count >= 0 AND surface_count <= max_surfaces)
        );

        CREATE TABLE IF NOT EXISTS relationship_state (
            user_id              TEXT NOT NULL,
            persona_id           TEXT NOT NULL,
            score                REAL NOT NULL,
            warmth               REAL NOT NULL,
            trust                REAL NOT NULL,
            playfulness          REAL NOT NULL,
            stability            REAL NOT NULL,
            tier                 TEXT NOT NULL,
            familiarity          TEXT NOT NULL,
            is_ruptured          INTEGER NOT NULL DEFAULT 0,
            last_rupture_at      INTEGER,
            first_interaction_at INTEGER NOT NULL,
            last_interaction_at  INTEGER NOT NULL,
            total_interactions   INTEGER NOT NULL DEFAULT 0,
            decay_days_applied   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, persona_id)
        );

        CREATE TABLE IF NOT EXISTS relationship_events (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            persona_id  TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            sentiment   TEXT NOT NULL,
            user_mood   TEXT NOT NULL,
            action_type TEXT NOT NULL,
            d_score     REAL NOT NULL,
            d_warmth    REAL NOT NULL,
            d_trust     REAL NOT NULL,
            d_playful   REAL NOT NULL,
            d_stability REAL NOT NULL,
            ruptured    INTEGER NOT NULL DEFAULT 0,
            repaired    INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS insight_records (
            id                TEXT PRIMARY KEY,
            user_id           TEXT NOT NULL,
            subject           TEXT NOT NULL,
            pattern_key       TEXT NOT NULL,
            observation_count INTEGER NOT NULL DEFAULT 1,
            confidence        REAL NOT NULL,
            first_observed_at INTEGER NOT NULL,
            last_observed_at  INTEGER NOT NULL,
            UNIQUE (user_id, subject, pattern_key)
        );

        CREATE TABLE IF NOT EXISTS ongoing_threads (
            id                TEXT PRIMARY KEY,
            persona_id        TEXT NOT NULL,
            user_id           TEXT NOT NULL,
            topic             TEXT NOT NULL,
            intensity         REAL NOT NULL CHECK (intensity >= 0.0 AND intensity <= 1.0),
            user_related      INTEGER NOT NULL DEFAULT 0,
            created_at        INTEGER NOT NULL,
            last_mentioned_at INTEGER,
            status            TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_loops_user_status ON open_loops(user_id, status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_loops_open_topic
            ON open_loops(user_id, topic) WHERE status IN ('active', 'surfaced');
        CREATE INDEX IF NOT EXISTS idx_events_window
            ON relationship_events(user_id, persona_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_insights_user ON insight_records(user_id);
        CREATE INDEX IF NOT EXISTS idx_threads_pair ON ongoing_threads(persona_id, user_id, status);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'metadata')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(None);
    }
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
