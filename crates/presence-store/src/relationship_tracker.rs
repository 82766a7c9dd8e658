//! Relationship orchestration over a [`RelationshipStore`].
//!
//! Scoring runs inside the store's serialized read-modify-write, so a turn
//! and a background decay touching the same relationship cannot overwrite
//! one another. Inactivity decay is charged lazily right before the next
//! event is scored, never during a read.

use tracing::{debug, info, warn};

use presence_core::{
    ClassifiedEvent, Clock, DecayScheduler, EngineConfig, FamiliarityStage, InsightObservation,
    InsightRecord, RelationshipEvent, RelationshipScorer, RelationshipState, RuptureTransition,
    top_insights,
};

use crate::relationships::{RelationshipStore, StateWrite};

/// Outcome of scoring one event.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub state: RelationshipState,
    pub transition: Option<RuptureTransition>,
}

pub struct RelationshipTracker<'a, S: RelationshipStore + ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
    config: &'a EngineConfig,
}

impl<'a, S: RelationshipStore + ?Sized> RelationshipTracker<'a, S> {
    pub fn new(store: &'a S, clock: &'a dyn Clock, config: &'a EngineConfig) -> Self {
        Self { store, clock, config }
    }

    /// Current state, as stored. Never writes.
    pub fn get_state(&self, user_id: &str, persona_id: &str) -> Option<RelationshipState> {
        self.store
            .get_state(user_id, persona_id)
            .inspect_err(|error| warn!(%error, user_id, persona_id, "relationship read failed"))
            .ok()
            .flatten()
    }

    /// Score one classified event, creating the relationship on first contact.
    pub fn record_event(&self, user_id: &str, persona_id: &str, event: &ClassifiedEvent) -> Option<RecordedEvent> {
        let now = self.clock.now();
        let scorer = RelationshipScorer::new(&self.config.relationship, &self.config.rupture);
        let decay = DecayScheduler::new(&self.config.decay);
        let rupture = &self.config.rupture;
        let mut transition = None;

        let result = self.store.update_state(
            user_id,
            persona_id,
            now - rupture.window_secs(),
            rupture.window_events,
            &mut |current: Option<&RelationshipState>, recent: &[RelationshipEvent]| {
                let base = match current {
                    Some(s) => decay.decay_relationship(s, now).unwrap_or_else(|| s.clone()),
                    None => RelationshipState::new(user_id, persona_id, now, &self.config.relationship),
                };
                let outcome = scorer.apply_event(&base, event, recent, now);
                transition = outcome.transition;
                Some(StateWrite {
                    state: outcome.state,
                    event: Some(outcome.record),
                })
            },
        );

        match result {
            Ok(Some(state)) => {
                match transition {
                    Some(RuptureTransition::Ruptured { cause }) => {
                        info!(user_id, persona_id, ?cause, score = state.score, "relationship ruptured");
                    }
                    Some(RuptureTransition::Repaired) => {
                        info!(user_id, persona_id, score = state.score, "relationship repaired");
                    }
                    None => debug!(user_id, persona_id, score = state.score, tier = %state.tier, "event scored"),
                }
                Some(RecordedEvent { state, transition })
            }
            Ok(None) => None,
            Err(error) => {
                warn!(%error, user_id, persona_id, "relationship update failed");
                None
            }
        }
    }

    /// Charge any idle days due and catch the familiarity stage up with the
    /// calendar. Returns whether the state changed.
    pub fn apply_decay(&self, user_id: &str, persona_id: &str) -> bool {
        let now = self.clock.now();
        let decay = DecayScheduler::new(&self.config.decay);
        let thresholds = &self.config.relationship.familiarity;
        let mut changed = false;
        let result = self.store.update_state(user_id, persona_id, now, 0, &mut |current: Option<&RelationshipState>, _: &[RelationshipEvent]| {
            let current = current?;
            let (mut next, decayed) = match decay.decay_relationship(current, now) {
                Some(next) => (next, true),
                None => (current.clone(), false),
            };
            let promoted = next.refresh_familiarity(now, thresholds);
            if !decayed && !promoted {
                return None;
            }
            changed = true;
            Some(StateWrite { state: next, event: None })
        });
        match result {
            Ok(_) => changed,
            Err(error) => {
                warn!(%error, user_id, persona_id, "relationship decay failed");
                false
            }
        }
    }

    /// Decay every stored relationship. Returns how many changed.
    pub fn decay_all(&self) -> usize {
        let keys = match self.store.relationship_keys() {
            Ok(keys) => keys,
            Err(error) => {
                warn!(%error, "relationship listing failed");
                return 0;
            }
        };
        keys.iter()
            .filter(|(user, persona)| self.apply_decay(user, persona))
            .count()
    }

    pub fn record_insight(&self, user_id: &str, obs: &InsightObservation) -> Option<InsightRecord> {
        if obs.subject.trim().is_empty() || obs.pattern_key.trim().is_empty() {
            return None;
        }
        self.store
            .record_insight(user_id, obs, self.clock.now())
            .inspect_err(|error| warn!(%error, user_id, "insight write failed"))
            .ok()
    }

    /// Insights to share, gated on an established relationship.
    pub fn top_insights(&self, user_id: &str, familiarity: FamiliarityStage) -> Vec<InsightRecord> {
        if familiarity != FamiliarityStage::Established {
            return Vec::new();
        }
        let records = self
            .store
            .insights_for(user_id)
            .inspect_err(|error| warn!(%error, user_id, "insight read failed"))
            .unwrap_or_default();
        let rc = &self.config.relationship;
        top_insights(&records, familiarity, rc.insight_min_observations, rc.top_insights_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use presence_core::time::{SECS_PER_DAY, SECS_PER_MINUTE};
    use presence_core::{ActionType, ManualClock, RuptureCause, Sentiment, Tier, UserMood};

    const START: i64 = 500 * SECS_PER_DAY;

    fn ev(s: Sentiment, m: UserMood, a: ActionType) -> ClassifiedEvent {
        ClassifiedEvent {
            sentiment_toward_persona: s,
            user_mood: m,
            action_type: a,
        }
    }

    #[test]
    fn test_first_event_creates_state() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        let config = EngineConfig::default();
        let t = RelationshipTracker::new(&store, &clock, &config);

        assert!(t.get_state("u1", "p1").is_none());
        let r = t
            .record_event("u1", "p1", &ev(Sentiment::Positive, UserMood::Happy, ActionType::Compliment))
            .unwrap();
        assert_eq!(r.state.total_interactions, 1);
        assert_eq!(r.state.first_interaction_at, START);
        assert_eq!(t.get_state("u1", "p1"), Some(r.state));
        assert_eq!(store.recent_events("u1", "p1", 0, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_cumulative_rupture_across_calls() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        let config = EngineConfig::default();
        let t = RelationshipTracker::new(&store, &clock, &config);
        let jab = ev(Sentiment::Negative, UserMood::Neutral, ActionType::Criticism);

        let mut last = None;
        for _ in 0..3 {
            last = t.record_event("u1", "p1", &jab);
            clock.advance(SECS_PER_MINUTE);
        }
        let last = last.unwrap();
        assert!(last.state.is_ruptured);
        assert_eq!(
            last.transition,
            Some(RuptureTransition::Ruptured {
                cause: RuptureCause::Cumulative
            })
        );
    }

    #[test]
    fn test_rupture_then_repair() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        let config = EngineConfig::default();
        let t = RelationshipTracker::new(&store, &clock, &config);

        let r = t
            .record_event("u1", "p1", &ev(Sentiment::Hostile, UserMood::Neutral, ActionType::Insult))
            .unwrap();
        assert!(r.state.is_ruptured);
        assert_eq!(r.state.tier, Tier::Rival);

        clock.advance(SECS_PER_MINUTE);
        let r = t
            .record_event("u1", "p1", &ev(Sentiment::Positive, UserMood::Sad, ActionType::Vulnerability))
            .unwrap();
        assert!(!r.state.is_ruptured);
        assert_eq!(r.transition, Some(RuptureTransition::Repaired));
    }

    #[test]
    fn test_lazy_decay_before_scoring() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        let config = EngineConfig::default();
        let t = RelationshipTracker::new(&store, &clock, &config);
        let kind = ev(Sentiment::Positive, UserMood::Calm, ActionType::Kindness);
        for _ in 0..4 {
            t.record_event("u1", "p1", &kind);
        }
        let before = t.get_state("u1", "p1").unwrap();

        clock.advance(20 * SECS_PER_DAY);
        assert_eq!(t.get_state("u1", "p1").unwrap(), before, "reads never decay");

        let after = t.record_event("u1", "p1", &kind).unwrap().state;
        let plain_gain = 1.5;
        assert!(after.dimensions.trust < before.dimensions.trust + plain_gain);
        assert_eq!(after.decay_days_applied, 0);
    }

    #[test]
    fn test_apply_decay_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        let config = EngineConfig::default();
        let t = RelationshipTracker::new(&store, &clock, &config);
        t.record_event("u1", "p1", &ev(Sentiment::Positive, UserMood::Calm, ActionType::Gratitude));

        assert!(!t.apply_decay("u1", "p1"), "inside grace period");
        clock.advance(10 * SECS_PER_DAY);
        assert!(t.apply_decay("u1", "p1"));
        assert!(!t.apply_decay("u1", "p1"));
        assert_eq!(t.decay_all(), 0);
        clock.advance(SECS_PER_DAY);
        assert_eq!(t.decay_all(), 1);
        assert!(!t.apply_decay("nobody", "p1"));
    }

    #[test]
    fn test_idle_sweep_promotes_familiarity() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        let config = EngineConfig::default();
        let t = RelationshipTracker::new(&store, &clock, &config);
        t.record_event("u1", "p1", &ev(Sentiment::Positive, UserMood::Calm, ActionType::Question));
        assert_eq!(t.get_state("u1", "p1").unwrap().familiarity, FamiliarityStage::Early);

        // Developing threshold reached on the last day of the grace period:
        // nothing decays, yet the stage still moves.
        clock.advance(config.relationship.familiarity.developing_after_days * SECS_PER_DAY);
        assert!(t.apply_decay("u1", "p1"));
        let state = t.get_state("u1", "p1").unwrap();
        assert_eq!(state.familiarity, FamiliarityStage::Developing);
        assert_eq!(state.decay_days_applied, 0);
        assert!(!t.apply_decay("u1", "p1"));

        clock.set(START + config.relationship.familiarity.established_after_days * SECS_PER_DAY);
        assert_eq!(t.decay_all(), 1);
        assert_eq!(t.get_state("u1", "p1").unwrap().familiarity, FamiliarityStage::Established);
    }

    #[test]
    fn test_insights_gated_on_familiarity() {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(START);
        let config = EngineConfig::default();
        let t = RelationshipTracker::new(&store, &clock, &config);
        let obs = InsightObservation {
            subject: "sleep".to_string(),
            pattern_key: "late_nights".to_string(),
            confidence: 0.7,
        };
        for _ in 0..3 {
            t.record_insight("u1", &obs).unwrap();
        }
        assert!(t.top_insights("u1", FamiliarityStage::Developing).is_empty());
        let top = t.top_insights("u1", FamiliarityStage::Established);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].observation_count, 3);

        let blank = InsightObservation {
            subject: " ".to_string(),
            ..obs
        };
        assert!(t.record_insight("u1", &blank).is_none());
    }
}
