//! Every tunable of the engine in one place.
//!
//! Components receive the section they need by reference; nothing reads a
//! module-level tunable. All sections deserialize with defaults so a partial
//! TOML file only overrides what it names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::open_loop::LoopKind;
use crate::time::{SECS_PER_DAY, SECS_PER_HOUR, SECS_PER_MINUTE};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub loops: LoopConfig,
    pub relationship: RelationshipConfig,
    pub rupture: RuptureConfig,
    pub decay: DecayConfig,
    pub router: RouterConfig,
    pub sweep: SweepConfig,
}

/// Open loop creation, matching, boosting and selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Topic similarity at or above which two topics are the same loop.
    pub topic_match_threshold: f64,
    /// Minimum gap between two surfacings of the same loop.
    pub min_surface_gap_minutes: i64,
    /// How long after `event_datetime` a pending event becomes a follow-up.
    pub event_buffer_minutes: i64,
    /// First term of the diminishing boost series.
    pub boost_base: f64,
    pub default_max_surfaces: u32,
    /// Lifetime of loops without an event date.
    pub default_lifetime_days: i64,
    /// How long a dated loop stays open after its event.
    pub event_expiry_days: i64,
    pub initial_salience: KindSalience,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            topic_match_threshold: 0.8,
            min_surface_gap_minutes: 6 * 60,
            event_buffer_minutes: 60,
            boost_base: 0.1,
            default_max_surfaces: 2,
            default_lifetime_days: 14,
            event_expiry_days: 3,
            initial_salience: KindSalience::default(),
        }
    }
}

impl LoopConfig {
    pub fn min_surface_gap_secs(&self) -> i64 {
        self.min_surface_gap_minutes * SECS_PER_MINUTE
    }

    pub fn event_buffer_secs(&self) -> i64 {
        self.event_buffer_minutes * SECS_PER_MINUTE
    }
}

/// Initial salience per loop kind when the analyzer supplies none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindSalience {
    pub pending_event: f64,
    pub emotional_followup: f64,
    pub commitment_check: f64,
    pub curiosity_thread: f64,
}

impl Default for KindSalience {
    fn default() -> Self {
        Self {
            pending_event: 0.6,
            emotional_followup: 0.7,
            commitment_check: 0.5,
            curiosity_thread: 0.35,
        }
    }
}

impl KindSalience {
    pub fn for_kind(&self, kind: LoopKind) -> f64 {
        match kind {
            LoopKind::PendingEvent => self.pending_event,
            LoopKind::EmotionalFollowup => self.emotional_followup,
            LoopKind::CommitmentCheck => self.commitment_check,
            LoopKind::CuriosityThread => self.curiosity_thread,
        }
    }
}

/// Inclusive lower and upper bound of one relationship dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min.max(0.0).min(self.max);
        }
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionBounds {
    pub warmth: Bounds,
    pub trust: Bounds,
    pub playfulness: Bounds,
    pub stability: Bounds,
}

impl Default for DimensionBounds {
    fn default() -> Self {
        Self {
            warmth: Bounds::new(-50.0, 50.0),
            trust: Bounds::new(-50.0, 50.0),
            playfulness: Bounds::new(-30.0, 30.0),
            stability: Bounds::new(-40.0, 40.0),
        }
    }
}

/// Upper (inclusive) score of each tier below `deeply_loving`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBoundaries {
    pub adversarial_max: f64,
    pub rival_max: f64,
    pub neutral_max: f64,
    pub friend_max: f64,
}

impl Default for TierBoundaries {
    fn default() -> Self {
        Self {
            adversarial_max: -40.0,
            rival_max: -10.0,
            neutral_max: 20.0,
            friend_max: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamiliarityThresholds {
    pub developing_after_days: i64,
    pub developing_after_interactions: u32,
    pub established_after_days: i64,
    pub established_after_interactions: u32,
}

impl Default for FamiliarityThresholds {
    fn default() -> Self {
        Self {
            developing_after_days: 7,
            developing_after_interactions: 20,
            established_after_days: 30,
            established_after_interactions: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipConfig {
    pub score_bounds: Bounds,
    pub bounds: DimensionBounds,
    pub tiers: TierBoundaries,
    pub familiarity: FamiliarityThresholds,
    /// Observations required before an insight may be surfaced.
    pub insight_min_observations: u32,
    pub top_insights_limit: usize,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            score_bounds: Bounds::new(-100.0, 100.0),
            bounds: DimensionBounds::default(),
            tiers: TierBoundaries::default(),
            familiarity: FamiliarityThresholds::default(),
            insight_min_observations: 3,
            top_insights_limit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuptureConfig {
    /// A single event whose score delta is below this ruptures the relationship.
    pub severity_threshold: f64,
    /// Rolling window: at most this many events (including the current one)...
    pub window_events: usize,
    /// ...no older than this...
    pub window_hours: i64,
    /// ...whose score deltas sum below this rupture the relationship.
    pub cumulative_threshold: f64,
    /// Scale applied to positive warmth/trust/stability deltas while ruptured.
    pub gain_multiplier: f64,
    /// Scale applied to negative warmth/trust/stability deltas while ruptured.
    pub loss_multiplier: f64,
    /// Minimum raw score delta of a repair-type event for it to count as repair.
    pub repair_min_score_delta: f64,
    pub repair_trust_bonus: f64,
    pub repair_stability_bonus: f64,
}

impl Default for RuptureConfig {
    fn default() -> Self {
        Self {
            severity_threshold: -12.0,
            window_events: 5,
            window_hours: 24,
            cumulative_threshold: -20.0,
            gain_multiplier: 0.5,
            loss_multiplier: 1.25,
            repair_min_score_delta: 3.0,
            repair_trust_bonus: 6.0,
            repair_stability_bonus: 4.0,
        }
    }
}

impl RuptureConfig {
    pub fn window_secs(&self) -> i64 {
        self.window_hours * SECS_PER_HOUR
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Idle days before relationship decay starts.
    pub grace_days: i64,
    pub warmth_per_day: f64,
    pub trust_per_day: f64,
    pub stability_per_day: f64,
    /// Maximum total decay per dimension within one inactivity window.
    pub max_total: f64,
    pub warmth_floor: f64,
    pub trust_floor: f64,
    pub stability_floor: f64,
    /// Days without a mention before an open loop's salience starts to fade.
    pub loop_grace_days: i64,
    pub loop_salience_per_day: f64,
    pub loop_salience_floor: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            grace_days: 7,
            warmth_per_day: 0.5,
            trust_per_day: 1.0,
            stability_per_day: 1.0,
            max_total: 15.0,
            warmth_floor: 0.0,
            trust_floor: 0.0,
            stability_floor: 0.0,
            loop_grace_days: 3,
            loop_salience_per_day: 0.02,
            loop_salience_floor: 0.05,
        }
    }
}

impl DecayConfig {
    pub fn grace_secs(&self) -> i64 {
        self.grace_days * SECS_PER_DAY
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// An open loop above this salience beats any ongoing thread.
    pub high_priority_threshold: f64,
    pub thread_min_intensity: f64,
    pub thread_min_age_hours: i64,
    pub thread_min_gap_hours: i64,
    pub user_related_bonus: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            high_priority_threshold: 0.75,
            thread_min_intensity: 0.6,
            thread_min_age_hours: 4,
            thread_min_gap_hours: 24,
            user_related_bonus: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    /// Terminal loops untouched for this long are physically deleted.
    pub terminal_retention_days: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
            terminal_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError(format!("{name} must be within [0, 1], got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError(format!("{name} must not be negative, got {value}")))
    }
}

impl EngineConfig {
    /// Reject configurations that would break an engine invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.loops;
        unit_interval("loops.topic_match_threshold", l.topic_match_threshold)?;
        if l.topic_match_threshold == 0.0 {
            return Err(ConfigError(
                "loops.topic_match_threshold must be above 0".to_string(),
            ));
        }
        unit_interval("loops.boost_base", l.boost_base)?;
        if l.default_max_surfaces == 0 {
            return Err(ConfigError(
                "loops.default_max_surfaces must be at least 1".to_string(),
            ));
        }
        non_negative("loops.min_surface_gap_minutes", l.min_surface_gap_minutes as f64)?;
        non_negative("loops.event_buffer_minutes", l.event_buffer_minutes as f64)?;
        for kind in LoopKind::ALL {
            unit_interval(
                &format!("loops.initial_salience.{kind}"),
                l.initial_salience.for_kind(kind),
            )?;
        }

        let r = &self.relationship;
        let t = &r.tiers;
        if !(t.adversarial_max < t.rival_max
            && t.rival_max < t.neutral_max
            && t.neutral_max < t.friend_max)
        {
            return Err(ConfigError(
                "relationship.tiers boundaries must be strictly increasing".to_string(),
            ));
        }
        for (name, b) in [
            ("score_bounds", r.score_bounds),
            ("bounds.warmth", r.bounds.warmth),
            ("bounds.trust", r.bounds.trust),
            ("bounds.playfulness", r.bounds.playfulness),
            ("bounds.stability", r.bounds.stability),
        ] {
            if b.min >= b.max {
                return Err(ConfigError(format!(
                    "relationship.{name}: min must be below max"
                )));
            }
        }

        let rp = &self.rupture;
        if rp.window_events == 0 {
            return Err(ConfigError("rupture.window_events must be at least 1".to_string()));
        }
        non_negative("rupture.gain_multiplier", rp.gain_multiplier)?;
        non_negative("rupture.loss_multiplier", rp.loss_multiplier)?;

        let d = &self.decay;
        non_negative("decay.grace_days", d.grace_days as f64)?;
        non_negative("decay.warmth_per_day", d.warmth_per_day)?;
        non_negative("decay.trust_per_day", d.trust_per_day)?;
        non_negative("decay.stability_per_day", d.stability_per_day)?;
        non_negative("decay.max_total", d.max_total)?;
        non_negative("decay.loop_salience_per_day", d.loop_salience_per_day)?;
        unit_interval("decay.loop_salience_floor", d.loop_salience_floor)?;

        let ro = &self.router;
        unit_interval("router.high_priority_threshold", ro.high_priority_threshold)?;
        unit_interval("router.thread_min_intensity", ro.thread_min_intensity)?;

        if self.sweep.interval_secs == 0 {
            return Err(ConfigError("sweep.interval_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_non_monotonic_tiers() {
        let mut config = EngineConfig::default();
        config.relationship.tiers.rival_max = 30.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_max_surfaces() {
        let mut config = EngineConfig::default();
        config.loops.default_max_surfaces = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut config = EngineConfig::default();
        config.router.high_priority_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("high_priority_threshold"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"loops": {"boost_base": 0.2}}"#).unwrap();
        assert_eq!(config.loops.boost_base, 0.2);
        assert_eq!(config.loops.topic_match_threshold, 0.8);
        assert_eq!(config.decay, DecayConfig::default());
    }

    #[test]
    fn test_bounds_clamp() {
        let b = Bounds::new(-10.0, 10.0);
        assert_eq!(b.clamp(15.0), 10.0);
        assert_eq!(b.clamp(-15.0), -10.0);
        assert_eq!(b.clamp(f64::NAN), 0.0);
    }
}
