//! Relationship scoring from pre-classified events.
//!
//! The scorer never interprets raw text: it looks up signed deltas for the
//! `(sentiment, mood, action)` triple, routes them through rupture/repair,
//! clamps, and re-derives tier and familiarity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{RelationshipConfig, RuptureConfig};
use crate::relationship::{
    ActionType, ClassifiedEvent, Deltas, FamiliarityStage, RelationshipEvent, RelationshipState,
    Sentiment, UserMood,
};
use crate::rupture::{RuptureCause, RuptureRepairDetector};

/// Signed deltas keyed by `(sentiment, mood, action)`.
///
/// Unlisted triples compose from three additive parts: the action's base
/// deltas, a sentiment shift and a mood adjustment. Explicit overrides win.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    overrides: HashMap<(Sentiment, UserMood, ActionType), Deltas>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, key: (Sentiment, UserMood, ActionType), deltas: Deltas) -> Self {
        self.overrides.insert(key, deltas);
        self
    }

    pub fn lookup(&self, e: &ClassifiedEvent) -> Deltas {
        let key = (e.sentiment_toward_persona, e.user_mood, e.action_type);
        if let Some(d) = self.overrides.get(&key) {
            return *d;
        }
        action_base(e.action_type) + sentiment_shift(e.sentiment_toward_persona) + mood_adjustment(e.user_mood)
    }
}

//                                         score  warmth trust  play   stab
fn action_base(action: ActionType) -> Deltas {
    match action {
        ActionType::Compliment => Deltas::new(4.0, 3.0, 1.0, 1.0, 0.5),
        ActionType::Gratitude => Deltas::new(3.0, 2.0, 1.5, 0.0, 1.0),
        ActionType::Apology => Deltas::new(3.0, 1.5, 2.0, 0.0, 2.0),
        ActionType::Vulnerability => Deltas::new(4.0, 2.0, 3.0, 0.0, 1.5),
        ActionType::Kindness => Deltas::new(3.0, 2.5, 1.5, 0.5, 1.0),
        ActionType::Joke => Deltas::new(2.0, 1.0, 0.0, 3.0, 0.0),
        ActionType::Sharing => Deltas::new(2.0, 1.5, 1.5, 0.5, 1.0),
        ActionType::Question => Deltas::new(1.0, 0.5, 0.5, 0.5, 0.5),
        ActionType::SmallTalk => Deltas::new(0.5, 0.5, 0.0, 0.5, 0.5),
        ActionType::Criticism => Deltas::new(-4.0, -2.0, -1.0, -1.0, -1.5),
        ActionType::Dismissive => Deltas::new(-5.0, -3.0, -2.0, -2.0, -2.0),
        ActionType::Insult => Deltas::new(-10.0, -6.0, -5.0, -3.0, -4.0),
    }
}

fn sentiment_shift(s: Sentiment) -> Deltas {
    match s {
        Sentiment::Positive => Deltas::new(2.0, 1.0, 0.0, 0.0, 0.0),
        Sentiment::Neutral => Deltas::default(),
        Sentiment::Negative => Deltas::new(-3.0, -1.0, -1.0, 0.0, 0.0),
        Sentiment::Hostile => Deltas::new(-8.0, -3.0, -3.0, -1.0, -2.0),
    }
}

// An angry or stressed user is partly venting; their negativity counts a little less.
fn mood_adjustment(m: UserMood) -> Deltas {
    match m {
        UserMood::Happy => Deltas::new(0.5, 0.0, 0.0, 0.5, 0.0),
        UserMood::Calm => Deltas::new(0.0, 0.0, 0.0, 0.0, 0.5),
        UserMood::Neutral => Deltas::default(),
        UserMood::Sad => Deltas::new(0.0, 0.5, 0.5, 0.0, 0.0),
        UserMood::Stressed => Deltas::new(1.0, 0.0, 0.0, 0.0, -0.5),
        UserMood::Angry => Deltas::new(2.0, 0.0, 0.0, 0.0, -1.0),
    }
}

/// Rupture flag change caused by one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum RuptureTransition {
    Ruptured { cause: RuptureCause },
    Repaired,
}

/// Result of scoring one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub state: RelationshipState,
    pub record: RelationshipEvent,
    pub transition: Option<RuptureTransition>,
}

pub struct RelationshipScorer<'a> {
    config: &'a RelationshipConfig,
    detector: RuptureRepairDetector<'a>,
    table: RuleTable,
}

impl<'a> RelationshipScorer<'a> {
    pub fn new(config: &'a RelationshipConfig, rupture: &'a RuptureConfig) -> Self {
        Self::with_table(config, rupture, RuleTable::new())
    }

    pub fn with_table(config: &'a RelationshipConfig, rupture: &'a RuptureConfig, table: RuleTable) -> Self {
        Self {
            config,
            detector: RuptureRepairDetector::new(rupture),
            table,
        }
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Score one event. `recent` holds this relationship's prior events, newest first.
    pub fn apply_event(
        &self,
        state: &RelationshipState,
        event: &ClassifiedEvent,
        recent: &[RelationshipEvent],
        now: i64,
    ) -> ScoreOutcome {
        let raw = self.table.lookup(event);
        let mut next = state.clone();

        let (applied, transition) = if state.is_ruptured {
            if self.detector.is_repair(event, &raw) {
                next.is_ruptured = false;
                (raw + self.detector.repair_bonus(), Some(RuptureTransition::Repaired))
            } else {
                (self.detector.penalise(&raw), None)
            }
        } else {
            match self.detector.detect(&raw, recent, now) {
                Some(cause) => {
                    next.is_ruptured = true;
                    next.last_rupture_at = Some(now);
                    (raw, Some(RuptureTransition::Ruptured { cause }))
                }
                None => (raw, None),
            }
        };

        next.apply(&applied, self.config);
        next.total_interactions = next.total_interactions.saturating_add(1);
        next.last_interaction_at = now;
        next.decay_days_applied = 0;
        next.familiarity = FamiliarityStage::compute(
            next.first_interaction_at,
            next.total_interactions,
            now,
            &self.config.familiarity,
        );

        let record = RelationshipEvent {
            id: Uuid::new_v4(),
            user_id: state.user_id.clone(),
            persona_id: state.persona_id.clone(),
            created_at: now,
            sentiment: event.sentiment_toward_persona,
            user_mood: event.user_mood,
            action_type: event.action_type,
            deltas: applied,
            ruptured: matches!(transition, Some(RuptureTransition::Ruptured { .. })),
            repaired: matches!(transition, Some(RuptureTransition::Repaired)),
        };

        ScoreOutcome {
            state: next,
            record,
            transition,
        }
    }
}
