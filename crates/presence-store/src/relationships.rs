//! `relationship_state`, `relationship_events` and `insight_records`.

use rusqlite::{OptionalExtension, Row, Transaction, TransactionBehavior, params};
use uuid::Uuid;

use presence_core::{
    ActionType, Deltas, Dimensions, FamiliarityStage, InsightObservation, InsightRecord,
    RelationshipEvent, RelationshipState, Sentiment, Tier, UserMood, clamp_salience,
};

use crate::error::Result;
use crate::store::{Store, get_enum, get_uuid};

/// What an [`RelationshipStore::update_state`] callback wants persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StateWrite {
    pub state: RelationshipState,
    pub event: Option<RelationshipEvent>,
}

/// Read-modify-write callback: current state (if any) and the recent
/// events, newest first.
pub type StateUpdate<'a> =
    dyn FnMut(Option<&RelationshipState>, &[RelationshipEvent]) -> Option<StateWrite> + 'a;

pub trait RelationshipStore {
    fn get_state(&self, user_id: &str, persona_id: &str) -> Result<Option<RelationshipState>>;

    fn upsert_state(&self, state: &RelationshipState) -> Result<()>;

    /// Append to the audit log. Re-appending an existing id is a no-op.
    fn append_event(&self, event: &RelationshipEvent) -> Result<()>;

    /// Events at or after `since`, newest first, at most `limit`.
    fn recent_events(
        &self,
        user_id: &str,
        persona_id: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RelationshipEvent>>;

    /// Serialized read-compute-write of one relationship. The callback sees
    /// the state and the last `window_limit` events since `window_since`;
    /// whatever it returns is written in the same write transaction, so two
    /// writers on separate connections cannot lose each other's update.
    /// Returns the state as it stands afterwards.
    fn update_state(
        &self,
        user_id: &str,
        persona_id: &str,
        window_since: i64,
        window_limit: usize,
        f: &mut StateUpdate<'_>,
    ) -> Result<Option<RelationshipState>>;

    /// Upsert by `(user, subject, pattern_key)`, counting one more observation.
    fn record_insight(&self, user_id: &str, obs: &InsightObservation, now: i64) -> Result<InsightRecord>;

    fn insights_for(&self, user_id: &str) -> Result<Vec<InsightRecord>>;

    /// Every `(user, persona)` pair with a stored state.
    fn relationship_keys(&self) -> Result<Vec<(String, String)>>;
}

const STATE_COLUMNS: &str = "user_id, persona_id, score, warmth, trust, playfulness, stability,
     tier, familiarity, is_ruptured, last_rupture_at, first_interaction_at, last_interaction_at,
     total_interactions, decay_days_applied";

const EVENT_COLUMNS: &str = "id, user_id, persona_id, created_at, sentiment, user_mood, action_type,
     d_score, d_warmth, d_trust, d_playful, d_stability, ruptured, repaired";

const INSIGHT_COLUMNS: &str = "id, user_id, subject, pattern_key, observation_count, confidence,
     first_observed_at, last_observed_at";

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<RelationshipState> {
    Ok(RelationshipState {
        user_id: row.get(0)?,
        persona_id: row.get(1)?,
        score: row.get(2)?,
        dimensions: Dimensions {
            warmth: row.get(3)?,
            trust: row.get(4)?,
            playfulness: row.get(5)?,
            stability: row.get(6)?,
        },
        tier: get_enum(row, 7, Tier::parse)?,
        familiarity: get_enum(row, 8, FamiliarityStage::parse)?,
        is_ruptured: row.get(9)?,
        last_rupture_at: row.get(10)?,
        first_interaction_at: row.get(11)?,
        last_interaction_at: row.get(12)?,
        total_interactions: row.get(13)?,
        decay_days_applied: row.get(14)?,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<RelationshipEvent> {
    Ok(RelationshipEvent {
        id: get_uuid(row, 0)?,
        user_id: row.get(1)?,
        persona_id: row.get(2)?,
        created_at: row.get(3)?,
        sentiment: get_enum(row, 4, Sentiment::parse)?,
        user_mood: get_enum(row, 5, UserMood::parse)?,
        action_type: get_enum(row, 6, ActionType::parse)?,
        deltas: Deltas {
            score: row.get(7)?,
            warmth: row.get(8)?,
            trust: row.get(9)?,
            playfulness: row.get(10)?,
            stability: row.get(11)?,
        },
        ruptured: row.get(12)?,
        repaired: row.get(13)?,
    })
}

fn row_to_insight(row: &Row<'_>) -> rusqlite::Result<InsightRecord> {
    Ok(InsightRecord {
        id: get_uuid(row, 0)?,
        user_id: row.get(1)?,
        subject: row.get(2)?,
        pattern_key: row.get(3)?,
        observation_count: row.get(4)?,
        confidence: row.get(5)?,
        first_observed_at: row.get(6)?,
        last_observed_at: row.get(7)?,
    })
}

fn write_state(conn: &rusqlite::Connection, s: &RelationshipState) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO relationship_state ({STATE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(user_id, persona_id) DO UPDATE SET
                 score = excluded.score,
                 warmth = excluded.warmth,
                 trust = excluded.trust,
                 playfulness = excluded.playfulness,
                 stability = excluded.stability,
                 tier = excluded.tier,
                 familiarity = excluded.familiarity,
                 is_ruptured = excluded.is_ruptured,
                 last_rupture_at = excluded.last_rupture_at,
                 first_interaction_at = excluded.first_interaction_at,
                 last_interaction_at = excluded.last_interaction_at,
                 total_interactions = excluded.total_interactions,
                 decay_days_applied = excluded.decay_days_applied"
        ),
        params![
            s.user_id,
            s.persona_id,
            s.score,
            s.dimensions.warmth,
            s.dimensions.trust,
            s.dimensions.playfulness,
            s.dimensions.stability,
            s.tier.as_str(),
            s.familiarity.as_str(),
            s.is_ruptured,
            s.last_rupture_at,
            s.first_interaction_at,
            s.last_interaction_at,
            s.total_interactions,
            s.decay_days_applied,
        ],
    )?;
    Ok(())
}

fn write_event(conn: &rusqlite::Connection, e: &RelationshipEvent) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO relationship_events ({EVENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO NOTHING"
        ),
        params![
            e.id.to_string(),
            e.user_id,
            e.persona_id,
            e.created_at,
            e.sentiment.as_str(),
            e.user_mood.as_str(),
            e.action_type.as_str(),
            e.deltas.score,
            e.deltas.warmth,
            e.deltas.trust,
            e.deltas.playfulness,
            e.deltas.stability,
            e.ruptured,
            e.repaired,
        ],
    )?;
    Ok(())
}

fn query_state(conn: &rusqlite::Connection, user_id: &str, persona_id: &str) -> Result<Option<RelationshipState>> {
    let state = conn
        .query_row(
            &format!("SELECT {STATE_COLUMNS} FROM relationship_state WHERE user_id = ?1 AND persona_id = ?2"),
            params![user_id, persona_id],
            row_to_state,
        )
        .optional()?;
    Ok(state)
}

fn query_events(
    conn: &rusqlite::Connection,
    user_id: &str,
    persona_id: &str,
    since: i64,
    limit: usize,
) -> Result<Vec<RelationshipEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM relationship_events
         WHERE user_id = ?1 AND persona_id = ?2 AND created_at >= ?3
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?4"
    ))?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let events = stmt
        .query_map(params![user_id, persona_id, since, limit], row_to_event)?
        .collect::<std::result::Result<_, _>>()?;
    Ok(events)
}

impl RelationshipStore for Store {
    fn get_state(&self, user_id: &str, persona_id: &str) -> Result<Option<RelationshipState>> {
        query_state(self.conn(), user_id, persona_id)
    }

    fn upsert_state(&self, state: &RelationshipState) -> Result<()> {
        write_state(self.conn(), state)
    }

    fn append_event(&self, event: &RelationshipEvent) -> Result<()> {
        write_event(self.conn(), event)
    }

    fn recent_events(
        &self,
        user_id: &str,
        persona_id: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RelationshipEvent>> {
        query_events(self.conn(), user_id, persona_id, since, limit)
    }

    fn update_state(
        &self,
        user_id: &str,
        persona_id: &str,
        window_since: i64,
        window_limit: usize,
        f: &mut StateUpdate<'_>,
    ) -> Result<Option<RelationshipState>> {
        // IMMEDIATE takes the write lock up front; a DEFERRED read that later
        // upgrades could fail with SQLITE_BUSY mid-transaction.
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;
        let current = query_state(&tx, user_id, persona_id)?;
        let recent = query_events(&tx, user_id, persona_id, window_since, window_limit)?;
        let result = match f(current.as_ref(), &recent) {
            Some(write) => {
                write_state(&tx, &write.state)?;
                if let Some(event) = &write.event {
                    write_event(&tx, event)?;
                }
                Some(write.state)
            }
            None => current,
        };
        tx.commit()?;
        Ok(result)
    }

    fn record_insight(&self, user_id: &str, obs: &InsightObservation, now: i64) -> Result<InsightRecord> {
        let record = self.conn().query_row(
            &format!(
                "INSERT INTO insight_records ({INSIGHT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)
                 ON CONFLICT(user_id, subject, pattern_key) DO UPDATE SET
                     observation_count = observation_count + 1,
                     confidence = MAX(confidence, excluded.confidence),
                     last_observed_at = excluded.last_observed_at
                 RETURNING {INSIGHT_COLUMNS}"
            ),
            params![
                Uuid::new_v4().to_string(),
                user_id,
                obs.subject,
                obs.pattern_key,
                clamp_salience(obs.confidence),
                now,
            ],
            row_to_insight,
        )?;
        Ok(record)
    }

    fn insights_for(&self, user_id: &str) -> Result<Vec<InsightRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insight_records WHERE user_id = ?1
             ORDER BY first_observed_at, id"
        ))?;
        let records = stmt
            .query_map([user_id], row_to_insight)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(records)
    }

    fn relationship_keys(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id, persona_id FROM relationship_state ORDER BY user_id, persona_id")?;
        let keys = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(keys)
    }
}

// --- Whole-collection access for export/import ---

impl Store {
    pub fn all_states(&self) -> Result<Vec<RelationshipState>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STATE_COLUMNS} FROM relationship_state ORDER BY user_id, persona_id"
        ))?;
        let states = stmt
            .query_map([], row_to_state)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(states)
    }

    pub fn all_events(&self) -> Result<Vec<RelationshipEvent>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM relationship_events ORDER BY created_at, rowid"
        ))?;
        let events = stmt
            .query_map([], row_to_event)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(events)
    }

    pub fn all_insights(&self) -> Result<Vec<InsightRecord>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {INSIGHT_COLUMNS} FROM insight_records ORDER BY user_id, id"))?;
        let records = stmt
            .query_map([], row_to_insight)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(records)
    }

    /// Insert or overwrite an insight by id.
    pub fn upsert_insight(&self, r: &InsightRecord) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO insight_records ({INSIGHT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     observation_count = excluded.observation_count,
                     confidence = excluded.confidence,
                     first_observed_at = excluded.first_observed_at,
                     last_observed_at = excluded.last_observed_at"
            ),
            params![
                r.id.to_string(),
                r.user_id,
                r.subject,
                r.pattern_key,
                r.observation_count,
                clamp_salience(r.confidence),
                r.first_observed_at,
                r.last_observed_at,
            ],
        )?;
        Ok(())
    }
}
