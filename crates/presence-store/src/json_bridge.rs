use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use serde::Serialize;

use presence_core::{RelationshipConfig, Snapshot, export_json, import_json};

use crate::error::{Result, StoreError};
use crate::loops::OpenLoopStore;
use crate::relationships::RelationshipStore;
use crate::store::Store;
use crate::threads::ThreadStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub upserted: usize,
    pub deleted: usize,
}

impl Store {
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            loops: self.all_loops()?,
            states: self.all_states()?,
            events: self.all_events()?,
            insights: self.all_insights()?,
            threads: self.all_threads()?,
        })
    }

    pub fn export_json_string(&self, now: i64) -> Result<String> {
        export_json(self.snapshot()?, now)
            .map_err(|e| StoreError::InvalidData(format!("JSON export failed: {e}")))
    }

    pub fn export_json_file(&self, path: &Path, now: i64) -> Result<()> {
        let json = self.export_json_string(now)?;
        fs::write(path, json).map_err(|e| {
            StoreError::InvalidData(format!("failed to write {}: {e}", path.display()))
        })
    }

    pub fn import_json_str(&self, json: &str, config: &RelationshipConfig, now: i64) -> Result<ImportReport> {
        let snapshot = import_json(json, config).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        self.restore(&snapshot, now)
    }

    pub fn import_json_file(&self, path: &Path, config: &RelationshipConfig, now: i64) -> Result<ImportReport> {
        let json = fs::read_to_string(path).map_err(|e| {
            StoreError::InvalidData(format!("failed to read {}: {e}", path.display()))
        })?;
        self.import_json_str(&json, config, now)
    }

    /// Make the store hold exactly `snapshot`, in one transaction.
    ///
    /// Rows are upserted by key and only keys missing from the snapshot are
    /// deleted. Relationship events are append-only: imported ones are added
    /// if new and existing ones are never removed. The write lock is taken
    /// up front so a concurrent writer cannot invalidate what was read.
    pub fn restore(&self, snapshot: &Snapshot, now: i64) -> Result<ImportReport> {
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;
        let mut report = ImportReport::default();

        // Deletions first so a replacement row can take over a unique key.
        report.deleted += delete_absent(&tx, "open_loops", snapshot.loops.iter().map(|l| l.id.to_string()))?;
        report.deleted += delete_absent(&tx, "insight_records", snapshot.insights.iter().map(|i| i.id.to_string()))?;
        report.deleted += delete_absent(&tx, "ongoing_threads", snapshot.threads.iter().map(|t| t.id.to_string()))?;
        report.deleted += delete_absent_states(&tx, snapshot)?;

        for l in &snapshot.loops {
            self.upsert_loop(l, now)?;
        }
        for s in &snapshot.states {
            self.upsert_state(s)?;
        }
        for e in &snapshot.events {
            self.append_event(e)?;
        }
        for i in &snapshot.insights {
            self.upsert_insight(i)?;
        }
        for t in &snapshot.threads {
            self.upsert_thread(t)?;
        }
        report.upserted = snapshot.loops.len() + snapshot.states.len() + snapshot.insights.len() + snapshot.threads.len();

        tx.commit()?;
        Ok(report)
    }
}

fn delete_absent(conn: &Connection, table: &str, keep: impl Iterator<Item = String>) -> Result<usize> {
    let keep: HashSet<String> = keep.collect();
    let existing: Vec<String> = conn
        .prepare(&format!("SELECT id FROM {table}"))?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    let mut stmt = conn.prepare(&format!("DELETE FROM {table} WHERE id = ?1"))?;
    let mut deleted = 0;
    for id in existing.iter().filter(|id| !keep.contains(*id)) {
        deleted += stmt.execute([id])?;
    }
    Ok(deleted)
}

fn delete_absent_states(conn: &Connection, snapshot: &Snapshot) -> Result<usize> {
    let keep: HashSet<(&str, &str)> = snapshot
        .states
        .iter()
        .map(|s| (s.user_id.as_str(), s.persona_id.as_str()))
        .collect();
    let existing: Vec<(String, String)> = conn
        .prepare("SELECT user_id, persona_id FROM relationship_state")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;
    let mut stmt = conn.prepare("DELETE FROM relationship_state WHERE user_id = ?1 AND persona_id = ?2")?;
    let mut deleted = 0;
    for (user, persona) in &existing {
        if !keep.contains(&(user.as_str(), persona.as_str())) {
            deleted += stmt.execute(params![user, persona])?;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_core::{
        ClassifiedEvent, EngineConfig, InsightObservation, LoopKind, LoopOptions, LoopStatus,
        ManualClock, OngoingThread, OpenLoop, RelationshipState, ActionType, Sentiment, UserMood,
    };
    use crate::relationship_tracker::RelationshipTracker;

    const NOW: i64 = 1_700_000_000;

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let clock = ManualClock::new(NOW);
        let l = OpenLoop::new("u1", LoopKind::PendingEvent, "job interview", 0.6, LoopOptions::default(), NOW, &config.loops);
        store.insert_loop(&l, NOW).unwrap();
        let t = RelationshipTracker::new(&store, &clock, &config);
        t.record_event(
            "u1",
            "p1",
            &ClassifiedEvent {
                sentiment_toward_persona: Sentiment::Positive,
                user_mood: UserMood::Happy,
                action_type: ActionType::Joke,
            },
        );
        t.record_insight(
            "u1",
            &InsightObservation {
                subject: "music".to_string(),
                pattern_key: "jazz".to_string(),
                confidence: 0.6,
            },
        );
        store
            .upsert_thread(&OngoingThread::new("p1", "u1", "tide pools", 0.5, false, NOW))
            .unwrap();
        store
    }

    #[test]
    fn test_export_import_into_empty_store() {
        let source = seeded();
        let json = source.export_json_string(NOW).unwrap();
        assert!(json.contains("\"version\": 1"));

        let target = Store::open_in_memory().unwrap();
        let report = target
            .import_json_str(&json, &RelationshipConfig::default(), NOW)
            .unwrap();
        assert_eq!(report, ImportReport { upserted: 4, deleted: 0 });
        assert_eq!(target.snapshot().unwrap(), source.snapshot().unwrap());
    }

    #[test]
    fn test_import_deletes_only_absent_rows() {
        let source = seeded();
        let json = source.export_json_string(NOW).unwrap();

        let target = seeded();
        let stray = OpenLoop::new("u2", LoopKind::CuriosityThread, "kites", 0.3, LoopOptions::default(), NOW, &EngineConfig::default().loops);
        target.insert_loop(&stray, NOW).unwrap();
        let report = target
            .import_json_str(&json, &RelationshipConfig::default(), NOW)
            .unwrap();

        // Fresh ids on each seeding: both loops, the insight and the thread
        // go. The relationship state shares its key and is overwritten.
        assert_eq!(report.deleted, 4);
        assert!(target.get_loop(stray.id).unwrap().is_none());
        assert_eq!(target.all_loops().unwrap(), source.all_loops().unwrap());
        assert_eq!(target.all_events().unwrap().len(), 2, "events are append-only");
    }

    #[test]
    fn test_import_clamps_and_rejects_versions() {
        let store = Store::open_in_memory().unwrap();
        let mut st = RelationshipState::new("u1", "p1", NOW, &RelationshipConfig::default());
        st.score = 500.0;
        let mut l = OpenLoop::new("u1", LoopKind::CommitmentCheck, "gym", 0.5, LoopOptions::default(), NOW, &EngineConfig::default().loops);
        l.salience = 3.0;
        let json = export_json(
            Snapshot {
                loops: vec![l],
                states: vec![st],
                ..Default::default()
            },
            NOW,
        )
        .unwrap();
        store.import_json_str(&json, &RelationshipConfig::default(), NOW).unwrap();
        assert_eq!(store.get_state("u1", "p1").unwrap().unwrap().score, 100.0);
        let loops = store.loops_for_user("u1", &[LoopStatus::Active]).unwrap();
        assert_eq!(loops[0].salience, 1.0);

        let bad = json.replacen("\"version\": 1", "\"version\": 9", 1);
        assert!(matches!(
            store.import_json_str(&bad, &RelationshipConfig::default(), NOW),
            Err(StoreError::InvalidData(_))
        ));
        assert!(store.import_json_str("not json", &RelationshipConfig::default(), NOW).is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let source = seeded();
        source.export_json_file(&path, NOW).unwrap();

        let target = Store::open_in_memory().unwrap();
        target
            .import_json_file(&path, &RelationshipConfig::default(), NOW)
            .unwrap();
        assert_eq!(target.stats().unwrap(), source.stats().unwrap());
        assert!(target.import_json_file(&dir.path().join("missing.json"), &RelationshipConfig::default(), NOW).is_err());
    }
}
