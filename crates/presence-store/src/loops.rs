//! `open_loops` collection.
//!
//! Every mutation that can race with another call path is a single
//! conditional statement: increments happen in SQL, status changes name the
//! statuses they may transition from, and restores upsert by id.

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use uuid::Uuid;

use presence_core::{LoopDecay, LoopKind, LoopStatus, OpenLoop};

use crate::error::Result;
use crate::store::{Store, get_enum, get_uuid, placeholders};

pub trait OpenLoopStore {
    /// Insert a new loop. Returns `false` if an open loop already holds the
    /// same `(user, topic)` or the id exists.
    fn insert_loop(&self, l: &OpenLoop, now: i64) -> Result<bool>;

    /// Insert or fully overwrite by id.
    fn upsert_loop(&self, l: &OpenLoop, now: i64) -> Result<()>;

    fn get_loop(&self, id: Uuid) -> Result<Option<OpenLoop>>;

    /// Loops for a user in any of `statuses`, oldest first.
    fn loops_for_user(&self, user_id: &str, statuses: &[LoopStatus]) -> Result<Vec<OpenLoop>>;

    /// `UPDATE ... SET status = to WHERE id IN (ids) AND status IN (from)`.
    fn set_loop_status(&self, ids: &[Uuid], from: &[LoopStatus], to: LoopStatus, now: i64) -> Result<usize>;

    /// Refresh recency on an open loop after the user mentions it again.
    fn touch_loop(&self, id: Uuid, now: i64) -> Result<bool>;

    /// Atomically add to salience (clamped to [0, 1]) and refresh recency.
    fn add_loop_salience(&self, id: Uuid, amount: f64, now: i64) -> Result<bool>;

    /// Atomically count one surfacing. Refuses once `max_surfaces` is reached.
    fn mark_loop_surfaced(&self, id: Uuid, now: i64) -> Result<bool>;

    /// Move open loops past `expires_at` to `expired`. `None` sweeps every user.
    fn expire_loops(&self, user_id: Option<&str>, now: i64) -> Result<usize>;

    /// Physically remove terminal loops not updated since `before`.
    fn delete_terminal_loops(&self, before: i64) -> Result<usize>;

    /// Apply a salience decay computed from a snapshot. No-op if the loop
    /// was mentioned or decayed by someone else in the meantime.
    fn apply_loop_decay(&self, decay: &LoopDecay, now: i64) -> Result<bool>;
}

const LOOP_COLUMNS: &str = "id, user_id, kind, topic, trigger_context, suggested_phrasing, salience,
     surface_count, max_surfaces, created_at, should_surface_after, expires_at, last_surfaced_at,
     last_mentioned_at, status, event_datetime, salience_decayed_days";

const OPEN: &str = "('active', 'surfaced')";

fn row_to_loop(row: &Row<'_>) -> rusqlite::Result<OpenLoop> {
    Ok(OpenLoop {
        id: get_uuid(row, 0)?,
        user_id: row.get(1)?,
        kind: get_enum(row, 2, LoopKind::parse)?,
        topic: row.get(3)?,
        trigger_context: row.get(4)?,
        suggested_phrasing: row.get(5)?,
        salience: row.get(6)?,
        surface_count: row.get(7)?,
        max_surfaces: row.get(8)?,
        created_at: row.get(9)?,
        should_surface_after: row.get(10)?,
        expires_at: row.get(11)?,
        last_surfaced_at: row.get(12)?,
        last_mentioned_at: row.get(13)?,
        status: get_enum(row, 14, LoopStatus::parse)?,
        event_datetime: row.get(15)?,
        salience_decayed_days: row.get(16)?,
    })
}

fn write_loop(conn: &Connection, l: &OpenLoop, now: i64, on_conflict: &str) -> Result<usize> {
    let l = l.clone().clamped();
    let sql = format!(
        "INSERT INTO open_loops ({LOOP_COLUMNS}, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         {on_conflict}"
    );
    let n = conn.execute(
        &sql,
        params![
            l.id.to_string(),
            l.user_id,
            l.kind.as_str(),
            l.topic,
            l.trigger_context,
            l.suggested_phrasing,
            l.salience,
            l.surface_count,
            l.max_surfaces,
            l.created_at,
            l.should_surface_after,
            l.expires_at,
            l.last_surfaced_at,
            l.last_mentioned_at,
            l.status.as_str(),
            l.event_datetime,
            l.salience_decayed_days,
            now,
        ],
    )?;
    Ok(n)
}

const UPSERT_LOOP: &str = "ON CONFLICT(id) DO UPDATE SET
         user_id = excluded.user_id,
         kind = excluded.kind,
         topic = excluded.topic,
         trigger_context = excluded.trigger_context,
         suggested_phrasing = excluded.suggested_phrasing,
         salience = excluded.salience,
         surface_count = excluded.surface_count,
         max_surfaces = excluded.max_surfaces,
         created_at = excluded.created_at,
         should_surface_after = excluded.should_surface_after,
         expires_at = excluded.expires_at,
         last_surfaced_at = excluded.last_surfaced_at,
         last_mentioned_at = excluded.last_mentioned_at,
         status = excluded.status,
         event_datetime = excluded.event_datetime,
         salience_decayed_days = excluded.salience_decayed_days,
         updated_at = excluded.updated_at";

impl OpenLoopStore for Store {
    fn insert_loop(&self, l: &OpenLoop, now: i64) -> Result<bool> {
        Ok(write_loop(self.conn(), l, now, "ON CONFLICT DO NOTHING")? == 1)
    }

    fn upsert_loop(&self, l: &OpenLoop, now: i64) -> Result<()> {
        write_loop(self.conn(), l, now, UPSERT_LOOP)?;
        Ok(())
    }

    fn get_loop(&self, id: Uuid) -> Result<Option<OpenLoop>> {
        let sql = format!("SELECT {LOOP_COLUMNS} FROM open_loops WHERE id = ?1");
        let l = self
            .conn()
            .query_row(&sql, [id.to_string()], row_to_loop)
            .optional()?;
        Ok(l)
    }

    fn loops_for_user(&self, user_id: &str, statuses: &[LoopStatus]) -> Result<Vec<OpenLoop>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {LOOP_COLUMNS} FROM open_loops
             WHERE user_id = ?1 AND status IN ({})
             ORDER BY created_at, id",
            placeholders(2, statuses.len())
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let args = std::iter::once(user_id.to_string()).chain(statuses.iter().map(|s| s.as_str().to_string()));
        let loops = stmt
            .query_map(params_from_iter(args), row_to_loop)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(loops)
    }

    fn set_loop_status(&self, ids: &[Uuid], from: &[LoopStatus], to: LoopStatus, now: i64) -> Result<usize> {
        if ids.is_empty() || from.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE open_loops SET status = ?1, updated_at = ?2
             WHERE id IN ({}) AND status IN ({})",
            placeholders(3, ids.len()),
            placeholders(3 + ids.len(), from.len()),
        );
        let args = [to.as_str().to_string(), now.to_string()]
            .into_iter()
            .chain(ids.iter().map(Uuid::to_string))
            .chain(from.iter().map(|s| s.as_str().to_string()));
        let n = self.conn().execute(&sql, params_from_iter(args))?;
        Ok(n)
    }

    fn touch_loop(&self, id: Uuid, now: i64) -> Result<bool> {
        let n = self.conn().execute(
            &format!(
                "UPDATE open_loops
                 SET last_mentioned_at = ?2, salience_decayed_days = 0, updated_at = ?2
                 WHERE id = ?1 AND status IN {OPEN}"
            ),
            params![id.to_string(), now],
        )?;
        Ok(n == 1)
    }

    fn add_loop_salience(&self, id: Uuid, amount: f64, now: i64) -> Result<bool> {
        let n = self.conn().execute(
            &format!(
                "UPDATE open_loops
                 SET salience = MIN(1.0, MAX(0.0, salience + ?2)),
                     last_mentioned_at = ?3, salience_decayed_days = 0, updated_at = ?3
                 WHERE id = ?1 AND status IN {OPEN}"
            ),
            params![id.to_string(), amount, now],
        )?;
        Ok(n == 1)
    }

    fn mark_loop_surfaced(&self, id: Uuid, now: i64) -> Result<bool> {
        let n = self.conn().execute(
            &format!(
                "UPDATE open_loops
                 SET surface_count = surface_count + 1, last_surfaced_at = ?2,
                     status = 'surfaced', updated_at = ?2
                 WHERE id = ?1 AND status IN {OPEN} AND surface_count < max_surfaces"
            ),
            params![id.to_string(), now],
        )?;
        Ok(n == 1)
    }

    fn expire_loops(&self, user_id: Option<&str>, now: i64) -> Result<usize> {
        let n = self.conn().execute(
            &format!(
                "UPDATE open_loops SET status = 'expired', updated_at = ?1
                 WHERE status IN {OPEN} AND expires_at <= ?1 AND (?2 IS NULL OR user_id = ?2)"
            ),
            params![now, user_id],
        )?;
        Ok(n)
    }

    fn delete_terminal_loops(&self, before: i64) -> Result<usize> {
        let n = self.conn().execute(
            &format!("DELETE FROM open_loops WHERE status NOT IN {OPEN} AND updated_at < ?1"),
            [before],
        )?;
        Ok(n)
    }

    fn apply_loop_decay(&self, decay: &LoopDecay, now: i64) -> Result<bool> {
        let n = self.conn().execute(
            &format!(
                "UPDATE open_loops
                 SET salience = CASE WHEN salience > ?2 THEN MAX(?2, salience - ?3) ELSE salience END,
                     salience_decayed_days = ?4, updated_at = ?7
                 WHERE id = ?1 AND status IN {OPEN}
                   AND salience_decayed_days = ?5
                   AND COALESCE(last_mentioned_at, created_at) = ?6"
            ),
            params![
                decay.id.to_string(),
                decay.floor,
                decay.amount,
                decay.to_days,
                decay.from_days,
                decay.anchor,
                now,
            ],
        )?;
        Ok(n == 1)
    }
}

impl Store {
    /// Every loop, for export.
    pub fn all_loops(&self) -> Result<Vec<OpenLoop>> {
        let sql = format!("SELECT {LOOP_COLUMNS} FROM open_loops ORDER BY user_id, created_at, id");
        let mut stmt = self.conn().prepare(&sql)?;
        let loops = stmt
            .query_map([], row_to_loop)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(loops)
    }
}
