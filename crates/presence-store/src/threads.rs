use rusqlite::{Row, params};
use uuid::Uuid;

use presence_core::{OngoingThread, ThreadStatus, clamp_salience};

use crate::error::Result;
use crate::store::{Store, get_enum, get_uuid};

pub trait ThreadStore {
    fn upsert_thread(&self, t: &OngoingThread) -> Result<()>;

    /// Active threads the persona holds about this user.
    fn threads_for(&self, persona_id: &str, user_id: &str) -> Result<Vec<OngoingThread>>;

    fn mark_thread_mentioned(&self, id: Uuid, now: i64) -> Result<bool>;

    fn retire_thread(&self, id: Uuid) -> Result<bool>;
}

const THREAD_COLUMNS: &str =
    "id, persona_id, user_id, topic, intensity, user_related, created_at, last_mentioned_at, status";

fn row_to_thread(row: &Row<'_>) -> rusqlite::Result<OngoingThread> {
    Ok(OngoingThread {
        id: get_uuid(row, 0)?,
        persona_id: row.get(1)?,
        user_id: row.get(2)?,
        topic: row.get(3)?,
        intensity: row.get(4)?,
        user_related: row.get(5)?,
        created_at: row.get(6)?,
        last_mentioned_at: row.get(7)?,
        status: get_enum(row, 8, ThreadStatus::parse)?,
    })
}

impl ThreadStore for Store {
    fn upsert_thread(&self, t: &OngoingThread) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO ongoing_threads ({THREAD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     topic = excluded.topic,
                     intensity = excluded.intensity,
                     user_related = excluded.user_related,
                     last_mentioned_at = excluded.last_mentioned_at,
                     status = excluded.status"
            ),
            params![
                t.id.to_string(),
                t.persona_id,
                t.user_id,
                t.topic,
                clamp_salience(t.intensity),
                t.user_related,
                t.created_at,
                t.last_mentioned_at,
                t.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn threads_for(&self, persona_id: &str, user_id: &str) -> Result<Vec<OngoingThread>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {THREAD_COLUMNS} FROM ongoing_threads
             WHERE persona_id = ?1 AND user_id = ?2 AND status = 'active'
             ORDER BY created_at, id"
        ))?;
        let threads = stmt
            .query_map(params![persona_id, user_id], row_to_thread)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(threads)
    }

    fn mark_thread_mentioned(&self, id: Uuid, now: i64) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE ongoing_threads SET last_mentioned_at = ?2 WHERE id = ?1 AND status = 'active'",
            params![id.to_string(), now],
        )?;
        Ok(n == 1)
    }

    fn retire_thread(&self, id: Uuid) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE ongoing_threads SET status = 'retired' WHERE id = ?1 AND status = 'active'",
            [id.to_string()],
        )?;
        Ok(n == 1)
    }
}

impl Store {
    pub fn all_threads(&self) -> Result<Vec<OngoingThread>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {THREAD_COLUMNS} FROM ongoing_threads ORDER BY persona_id, user_id, created_at"
        ))?;
        let threads = stmt
            .query_map([], row_to_thread)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(threads)
    }
}
