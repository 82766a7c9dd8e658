//! Inactivity decay for relationship dimensions and open-loop salience.
//!
//! Decay is a pure function of wall-clock time since the last interaction
//! (or, for loops, the last mention). Each record carries how many idle days
//! have already been charged, so running a sweep twice, or running the lazy
//! path and the scheduled path back to back, charges each day once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DecayConfig;
use crate::open_loop::OpenLoop;
use crate::relationship::RelationshipState;
use crate::time::whole_days_between;

/// A pending salience reduction for one loop.
///
/// Carries the anchor and the day count it was computed from so a store can
/// apply it conditionally and lose cleanly to a concurrent boost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopDecay {
    pub id: Uuid,
    pub anchor: i64,
    pub from_days: u32,
    pub to_days: u32,
    pub amount: f64,
    pub floor: f64,
}

impl LoopDecay {
    pub fn apply(&self, salience: f64) -> f64 {
        decayed(salience, self.amount, self.floor)
    }
}

pub struct DecayScheduler<'a> {
    config: &'a DecayConfig,
}

impl<'a> DecayScheduler<'a> {
    pub fn new(config: &'a DecayConfig) -> Self {
        Self { config }
    }

    /// Idle days past the grace period as of `now`.
    pub fn chargeable_days(&self, last_interaction_at: i64, now: i64) -> u32 {
        let idle = whole_days_between(last_interaction_at, now) - self.config.grace_days;
        idle.clamp(0, u32::MAX as i64) as u32
    }

    /// The decayed state, or `None` when no new idle day is due.
    pub fn decay_relationship(&self, state: &RelationshipState, now: i64) -> Option<RelationshipState> {
        let total = self.chargeable_days(state.last_interaction_at, now);
        let applied = state.decay_days_applied;
        if total <= applied {
            return None;
        }
        let c = self.config;
        let mut next = state.clone();
        next.dimensions.warmth = decayed(
            state.dimensions.warmth,
            self.increment(c.warmth_per_day, applied, total),
            c.warmth_floor,
        );
        next.dimensions.trust = decayed(
            state.dimensions.trust,
            self.increment(c.trust_per_day, applied, total),
            c.trust_floor,
        );
        next.dimensions.stability = decayed(
            state.dimensions.stability,
            self.increment(c.stability_per_day, applied, total),
            c.stability_floor,
        );
        next.decay_days_applied = total;
        Some(next)
    }

    /// Salience reduction due for an open loop, or `None`.
    pub fn decay_loop(&self, l: &OpenLoop, now: i64) -> Option<LoopDecay> {
        if !l.is_open() {
            return None;
        }
        let anchor = l.recency_anchor();
        let idle = whole_days_between(anchor, now) - self.config.loop_grace_days;
        let total = idle.clamp(0, u32::MAX as i64) as u32;
        if total <= l.salience_decayed_days {
            return None;
        }
        Some(LoopDecay {
            id: l.id,
            anchor,
            from_days: l.salience_decayed_days,
            to_days: total,
            amount: self.config.loop_salience_per_day * (total - l.salience_decayed_days) as f64,
            floor: self.config.loop_salience_floor,
        })
    }

    // Capped cumulative decay for `total` days minus what `applied` days already took.
    fn increment(&self, per_day: f64, applied: u32, total: u32) -> f64 {
        let cap = self.config.max_total;
        (per_day * total as f64).min(cap) - (per_day * applied as f64).min(cap)
    }
}

/// Move `value` down by `amount`, stopping at `floor`. Values already at or
/// under the floor are left alone.
fn decayed(value: f64, amount: f64, floor: f64) -> f64 {
    if value <= floor {
        value
    } else {
        (value - amount).max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoopConfig, RelationshipConfig};
    use crate::open_loop::{LoopKind, LoopOptions, LoopStatus};
    use crate::time::SECS_PER_DAY;
    use approx::assert_relative_eq;

    fn warm_state() -> RelationshipState {
        let mut s = RelationshipState::new("u", "p", 0, &RelationshipConfig::default());
        s.dimensions.warmth = 10.0;
        s.dimensions.trust = 10.0;
        s.dimensions.stability = 10.0;
        s.dimensions.playfulness = 5.0;
        s
    }

    #[test]
    fn test_no_decay_within_grace() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        assert!(d.decay_relationship(&warm_state(), 7 * SECS_PER_DAY).is_none());
    }

    #[test]
    fn test_trust_steeper_than_warmth() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let next = d.decay_relationship(&warm_state(), 10 * SECS_PER_DAY).unwrap();
        assert_eq!(next.decay_days_applied, 3);
        assert_relative_eq!(next.dimensions.warmth, 8.5);
        assert_relative_eq!(next.dimensions.trust, 7.0);
        assert_relative_eq!(next.dimensions.stability, 7.0);
        assert_eq!(next.dimensions.playfulness, 5.0);
    }

    #[test]
    fn test_floor_holds() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let next = d.decay_relationship(&warm_state(), 60 * SECS_PER_DAY).unwrap();
        assert_eq!(next.dimensions.trust, 0.0);
        assert_eq!(next.dimensions.stability, 0.0);
    }

    #[test]
    fn test_negative_values_not_pushed_down() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let mut s = warm_state();
        s.dimensions.trust = -12.0;
        let next = d.decay_relationship(&s, 20 * SECS_PER_DAY).unwrap();
        assert_eq!(next.dimensions.trust, -12.0);
    }

    #[test]
    fn test_max_total_caps_window() {
        let config = DecayConfig {
            max_total: 4.0,
            ..DecayConfig::default()
        };
        let d = DecayScheduler::new(&config);
        let mut s = warm_state();
        s.dimensions.trust = 40.0;
        let next = d.decay_relationship(&s, 100 * SECS_PER_DAY).unwrap();
        assert_relative_eq!(next.dimensions.trust, 36.0);
    }

    #[test]
    fn test_incremental_equals_one_shot() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let start = warm_state();

        let mut stepped = start.clone();
        for day in 8..=12 {
            if let Some(next) = d.decay_relationship(&stepped, day * SECS_PER_DAY) {
                stepped = next;
            }
        }
        let one_shot = d.decay_relationship(&start, 12 * SECS_PER_DAY).unwrap();
        assert_relative_eq!(stepped.dimensions.trust, one_shot.dimensions.trust);
        assert_relative_eq!(stepped.dimensions.warmth, one_shot.dimensions.warmth);
        assert_eq!(stepped.decay_days_applied, one_shot.decay_days_applied);
    }

    #[test]
    fn test_rerun_is_noop() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let now = 15 * SECS_PER_DAY;
        let once = d.decay_relationship(&warm_state(), now).unwrap();
        assert!(d.decay_relationship(&once, now).is_none());
    }

    fn idle_loop(salience: f64) -> OpenLoop {
        OpenLoop::new(
            "u",
            LoopKind::CuriosityThread,
            "pottery",
            salience,
            LoopOptions::default(),
            0,
            &LoopConfig::default(),
        )
    }

    #[test]
    fn test_loop_decay_after_grace() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let l = idle_loop(0.5);
        assert!(d.decay_loop(&l, 3 * SECS_PER_DAY).is_none());
        let decay = d.decay_loop(&l, 5 * SECS_PER_DAY).unwrap();
        assert_eq!(decay.from_days, 0);
        assert_eq!(decay.to_days, 2);
        assert_relative_eq!(decay.apply(l.salience), 0.46, epsilon = 1e-12);
    }

    #[test]
    fn test_loop_decay_respects_floor() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let l = idle_loop(0.1);
        let decay = d.decay_loop(&l, 13 * SECS_PER_DAY).unwrap();
        assert_eq!(decay.apply(l.salience), config.loop_salience_floor);
    }

    #[test]
    fn test_mention_resets_loop_anchor() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let mut l = idle_loop(0.5);
        l.last_mentioned_at = Some(10 * SECS_PER_DAY);
        assert!(d.decay_loop(&l, 12 * SECS_PER_DAY).is_none());
        assert_eq!(d.decay_loop(&l, 14 * SECS_PER_DAY).unwrap().anchor, 10 * SECS_PER_DAY);
    }

    #[test]
    fn test_closed_loops_do_not_decay() {
        let config = DecayConfig::default();
        let d = DecayScheduler::new(&config);
        let mut l = idle_loop(0.5);
        l.status = LoopStatus::Resolved;
        assert!(d.decay_loop(&l, 30 * SECS_PER_DAY).is_none());
    }
}
