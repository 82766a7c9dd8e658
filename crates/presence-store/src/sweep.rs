//! One maintenance pass over every known user.
//!
//! Each step is idempotent, so overlapping or repeated sweeps are harmless.

use serde::Serialize;
use tracing::{info, warn};

use presence_core::{Clock, EngineConfig};

use crate::relationship_tracker::RelationshipTracker;
use crate::store::Store;
use crate::tracker::OpenLoopTracker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub users: usize,
    pub expired: usize,
    pub loops_decayed: usize,
    pub relationships_decayed: usize,
    pub deleted: usize,
}

pub fn sweep_all(store: &Store, clock: &dyn Clock, config: &EngineConfig) -> SweepReport {
    let loops = OpenLoopTracker::new(store, clock, config);
    let relationships = RelationshipTracker::new(store, clock, config);

    let users = store
        .known_users()
        .inspect_err(|error| warn!(%error, "sweep could not list users"))
        .unwrap_or_default();

    let mut report = SweepReport {
        users: users.len(),
        ..SweepReport::default()
    };
    for user in &users {
        report.expired += loops.expire(user);
        report.loops_decayed += loops.decay_salience(user);
    }
    report.relationships_decayed = relationships.decay_all();
    report.deleted = loops.cleanup();

    info!(
        users = report.users,
        expired = report.expired,
        loops_decayed = report.loops_decayed,
        relationships_decayed = report.relationships_decayed,
        deleted = report.deleted,
        "sweep complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loops::OpenLoopStore;
    use presence_core::time::SECS_PER_DAY;
    use presence_core::{
        ActionType, ClassifiedEvent, LoopKind, LoopOptions, LoopStatus, ManualClock, Sentiment,
        UserMood,
    };

    const START: i64 = 2000 * SECS_PER_DAY;

    #[test]
    fn test_sweep_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        let config = EngineConfig::default();
        let loops = OpenLoopTracker::new(&store, &clock, &config);
        let short = loops
            .create(
                "u1",
                LoopKind::CommitmentCheck,
                "stretching",
                LoopOptions {
                    expires_at: Some(START + 2 * SECS_PER_DAY),
                    ..Default::default()
                },
            )
            .unwrap();
        let long = loops
            .create(
                "u1",
                LoopKind::EmotionalFollowup,
                "moving house",
                LoopOptions {
                    expires_at: Some(START + 60 * SECS_PER_DAY),
                    ..Default::default()
                },
            )
            .unwrap();
        RelationshipTracker::new(&store, &clock, &config).record_event(
            "u2",
            "p1",
            &ClassifiedEvent {
                sentiment_toward_persona: Sentiment::Positive,
                user_mood: UserMood::Calm,
                action_type: ActionType::Sharing,
            },
        );

        clock.advance(10 * SECS_PER_DAY);
        let first = sweep_all(&store, &clock, &config);
        assert_eq!(first.users, 2);
        assert_eq!(first.expired, 1);
        assert_eq!(first.loops_decayed, 1);
        assert_eq!(first.relationships_decayed, 1);
        assert_eq!(first.deleted, 0);
        assert_eq!(store.get_loop(short.id).unwrap().unwrap().status, LoopStatus::Expired);
        assert!(store.get_loop(long.id).unwrap().unwrap().salience < long.salience);

        let again = sweep_all(&store, &clock, &config);
        assert_eq!(again.expired + again.loops_decayed + again.relationships_decayed, 0);

        clock.advance(31 * SECS_PER_DAY);
        assert_eq!(sweep_all(&store, &clock, &config).deleted, 1);
    }

    #[test]
    fn test_empty_store() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        assert_eq!(sweep_all(&store, &clock, &EngineConfig::default()), SweepReport::default());
    }
}
