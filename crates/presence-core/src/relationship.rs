use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{FamiliarityThresholds, RelationshipConfig, TierBoundaries};
use crate::time::whole_days_between;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.as_str() == s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Discrete standing derived from the overall score. Ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Adversarial,
    Rival,
    Neutral,
    Friend,
    DeeplyLoving,
}

text_enum!(Tier {
    Adversarial => "adversarial",
    Rival => "rival",
    Neutral => "neutral",
    Friend => "friend",
    DeeplyLoving => "deeply_loving",
});

impl Tier {
    /// Monotonic step function from score to tier.
    pub fn for_score(score: f64, b: &TierBoundaries) -> Tier {
        if score <= b.adversarial_max {
            Tier::Adversarial
        } else if score <= b.rival_max {
            Tier::Rival
        } else if score <= b.neutral_max {
            Tier::Neutral
        } else if score <= b.friend_max {
            Tier::Friend
        } else {
            Tier::DeeplyLoving
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamiliarityStage {
    Early,
    Developing,
    Established,
}

text_enum!(FamiliarityStage {
    Early => "early",
    Developing => "developing",
    Established => "established",
});

impl FamiliarityStage {
    /// Either the elapsed-time or the interaction-count threshold is sufficient.
    pub fn compute(
        first_interaction_at: i64,
        total_interactions: u32,
        now: i64,
        t: &FamiliarityThresholds,
    ) -> FamiliarityStage {
        let days = whole_days_between(first_interaction_at, now);
        if days >= t.established_after_days || total_interactions >= t.established_after_interactions {
            FamiliarityStage::Established
        } else if days >= t.developing_after_days
            || total_interactions >= t.developing_after_interactions
        {
            FamiliarityStage::Developing
        } else {
            FamiliarityStage::Early
        }
    }
}

/// The user's sentiment toward the persona, as classified upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Hostile,
}

text_enum!(Sentiment {
    Positive => "positive",
    Neutral => "neutral",
    Negative => "negative",
    Hostile => "hostile",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserMood {
    Happy,
    Calm,
    Neutral,
    Sad,
    Stressed,
    Angry,
}

text_enum!(UserMood {
    Happy => "happy",
    Calm => "calm",
    Neutral => "neutral",
    Sad => "sad",
    Stressed => "stressed",
    Angry => "angry",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Compliment,
    Gratitude,
    Apology,
    Vulnerability,
    Kindness,
    Joke,
    Sharing,
    Question,
    SmallTalk,
    Criticism,
    Dismissive,
    Insult,
}

text_enum!(ActionType {
    Compliment => "compliment",
    Gratitude => "gratitude",
    Apology => "apology",
    Vulnerability => "vulnerability",
    Kindness => "kindness",
    Joke => "joke",
    Sharing => "sharing",
    Question => "question",
    SmallTalk => "small_talk",
    Criticism => "criticism",
    Dismissive => "dismissive",
    Insult => "insult",
});

impl ActionType {
    /// Actions that can repair a rupture.
    pub fn is_reparative(&self) -> bool {
        matches!(
            self,
            ActionType::Apology | ActionType::Vulnerability | ActionType::Kindness
        )
    }
}

/// A pre-classified interaction supplied by the intent analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedEvent {
    pub sentiment_toward_persona: Sentiment,
    pub user_mood: UserMood,
    pub action_type: ActionType,
}

/// Signed change to the score and each dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Deltas {
    pub score: f64,
    pub warmth: f64,
    pub trust: f64,
    pub playfulness: f64,
    pub stability: f64,
}

impl Deltas {
    pub const fn new(score: f64, warmth: f64, trust: f64, playfulness: f64, stability: f64) -> Self {
        Self {
            score,
            warmth,
            trust,
            playfulness,
            stability,
        }
    }
}

impl Add for Deltas {
    type Output = Deltas;

    fn add(self, o: Deltas) -> Deltas {
        Deltas {
            score: self.score + o.score,
            warmth: self.warmth + o.warmth,
            trust: self.trust + o.trust,
            playfulness: self.playfulness + o.playfulness,
            stability: self.stability + o.stability,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub warmth: f64,
    pub trust: f64,
    pub playfulness: f64,
    pub stability: f64,
}

/// How a persona stands with one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipState {
    pub user_id: String,
    pub persona_id: String,
    pub score: f64,
    pub dimensions: Dimensions,
    pub tier: Tier,
    pub familiarity: FamiliarityStage,
    pub is_ruptured: bool,
    pub last_rupture_at: Option<i64>,
    pub first_interaction_at: i64,
    pub last_interaction_at: i64,
    pub total_interactions: u32,
    /// Idle days already charged by decay in the current inactivity window.
    #[serde(default)]
    pub decay_days_applied: u32,
}

impl RelationshipState {
    /// A brand-new relationship, created lazily on first interaction.
    pub fn new(user_id: &str, persona_id: &str, now: i64, config: &RelationshipConfig) -> Self {
        Self {
            user_id: user_id.to_string(),
            persona_id: persona_id.to_string(),
            score: 0.0,
            dimensions: Dimensions::default(),
            tier: Tier::for_score(0.0, &config.tiers),
            familiarity: FamiliarityStage::Early,
            is_ruptured: false,
            last_rupture_at: None,
            first_interaction_at: now,
            last_interaction_at: now,
            total_interactions: 0,
            decay_days_applied: 0,
        }
    }

    /// Clamp score and dimensions to their bounds and re-derive the tier.
    pub fn clamp(&mut self, config: &RelationshipConfig) {
        self.score = config.score_bounds.clamp(self.score);
        let b = &config.bounds;
        self.dimensions.warmth = b.warmth.clamp(self.dimensions.warmth);
        self.dimensions.trust = b.trust.clamp(self.dimensions.trust);
        self.dimensions.playfulness = b.playfulness.clamp(self.dimensions.playfulness);
        self.dimensions.stability = b.stability.clamp(self.dimensions.stability);
        self.tier = Tier::for_score(self.score, &config.tiers);
    }

    /// Re-derive the familiarity stage as of `now`. Returns whether it moved.
    ///
    /// Elapsed time alone can promote a relationship, so this also runs
    /// during idle sweeps, not only when an event is scored.
    pub fn refresh_familiarity(&mut self, now: i64, thresholds: &FamiliarityThresholds) -> bool {
        let stage = FamiliarityStage::compute(self.first_interaction_at, self.total_interactions, now, thresholds);
        let moved = stage != self.familiarity;
        self.familiarity = stage;
        moved
    }

    /// Add deltas then restore invariants.
    pub fn apply(&mut self, d: &Deltas, config: &RelationshipConfig) {
        self.score += d.score;
        self.dimensions.warmth += d.warmth;
        self.dimensions.trust += d.trust;
        self.dimensions.playfulness += d.playfulness;
        self.dimensions.stability += d.stability;
        self.clamp(config);
    }
}

/// Append-only audit row for one scored interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEvent {
    pub id: Uuid,
    pub user_id: String,
    pub persona_id: String,
    pub created_at: i64,
    pub sentiment: Sentiment,
    pub user_mood: UserMood,
    pub action_type: ActionType,
    /// Deltas actually applied (after rupture penalties and repair bonuses).
    pub deltas: Deltas,
    pub ruptured: bool,
    pub repaired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SECS_PER_DAY;

    #[test]
    fn test_tier_boundaries() {
        let b = TierBoundaries::default();
        assert_eq!(Tier::for_score(-100.0, &b), Tier::Adversarial);
        assert_eq!(Tier::for_score(-40.0, &b), Tier::Adversarial);
        assert_eq!(Tier::for_score(-39.9, &b), Tier::Rival);
        assert_eq!(Tier::for_score(-10.0, &b), Tier::Rival);
        assert_eq!(Tier::for_score(0.0, &b), Tier::Neutral);
        assert_eq!(Tier::for_score(20.0, &b), Tier::Neutral);
        assert_eq!(Tier::for_score(20.5, &b), Tier::Friend);
        assert_eq!(Tier::for_score(60.0, &b), Tier::Friend);
        assert_eq!(Tier::for_score(60.1, &b), Tier::DeeplyLoving);
    }

    #[test]
    fn test_tier_monotonic() {
        let b = TierBoundaries::default();
        let mut prev = Tier::Adversarial;
        for i in -1000..=1000 {
            let tier = Tier::for_score(i as f64 / 10.0, &b);
            assert!(tier >= prev, "tier dropped at score {}", i as f64 / 10.0);
            prev = tier;
        }
    }

    #[test]
    fn test_familiarity_by_time_or_count() {
        let t = FamiliarityThresholds::default();
        assert_eq!(FamiliarityStage::compute(0, 0, 0, &t), FamiliarityStage::Early);
        assert_eq!(
            FamiliarityStage::compute(0, 0, 7 * SECS_PER_DAY, &t),
            FamiliarityStage::Developing
        );
        assert_eq!(FamiliarityStage::compute(0, 20, 0, &t), FamiliarityStage::Developing);
        assert_eq!(FamiliarityStage::compute(0, 100, 0, &t), FamiliarityStage::Established);
        assert_eq!(
            FamiliarityStage::compute(0, 1, 30 * SECS_PER_DAY, &t),
            FamiliarityStage::Established
        );
    }

    #[test]
    fn test_refresh_familiarity_promotes_with_time_alone() {
        let config = RelationshipConfig::default();
        let mut s = RelationshipState::new("u", "p", 0, &config);
        s.total_interactions = 1;
        assert!(!s.refresh_familiarity(6 * SECS_PER_DAY, &config.familiarity));
        assert_eq!(s.familiarity, FamiliarityStage::Early);
        assert!(s.refresh_familiarity(7 * SECS_PER_DAY, &config.familiarity));
        assert_eq!(s.familiarity, FamiliarityStage::Developing);
        assert!(s.refresh_familiarity(30 * SECS_PER_DAY, &config.familiarity));
        assert_eq!(s.familiarity, FamiliarityStage::Established);
        assert!(!s.refresh_familiarity(31 * SECS_PER_DAY, &config.familiarity));
    }

    #[test]
    fn test_apply_clamps_every_dimension() {
        let config = RelationshipConfig::default();
        let mut s = RelationshipState::new("u", "p", 0, &config);
        s.apply(&Deltas::new(500.0, 500.0, -500.0, 500.0, -500.0), &config);
        assert_eq!(s.score, 100.0);
        assert_eq!(s.dimensions.warmth, 50.0);
        assert_eq!(s.dimensions.trust, -50.0);
        assert_eq!(s.dimensions.playfulness, 30.0);
        assert_eq!(s.dimensions.stability, -40.0);
        assert_eq!(s.tier, Tier::DeeplyLoving);
    }

    #[test]
    fn test_enum_text_roundtrip() {
        for a in ActionType::ALL {
            assert_eq!(ActionType::parse(a.as_str()), Some(*a));
        }
        assert_eq!(UserMood::parse("stressed"), Some(UserMood::Stressed));
        assert_eq!(Tier::parse("deeply_loving"), Some(Tier::DeeplyLoving));
        assert_eq!(Sentiment::parse("meh"), None);
    }

    #[test]
    fn test_classified_event_wire_names() {
        let e: ClassifiedEvent = serde_json::from_str(
            r#"{"sentimentTowardPersona":"positive","userMood":"sad","actionType":"vulnerability"}"#,
        )
        .unwrap();
        assert_eq!(e.action_type, ActionType::Vulnerability);
        assert!(e.action_type.is_reparative());
    }
}
