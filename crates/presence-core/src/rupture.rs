//! Rupture and repair.
//!
//! A rupture is a severe negative excursion: one event far below the
//! severity threshold, or a short burst of events whose combined score delta
//! nets below the cumulative threshold. While ruptured, gains in warmth,
//! trust and stability are damped and losses amplified. The next strongly
//! positive reparative event (apology, vulnerability, kindness) clears the
//! flag and grants a trust/stability bonus.

use serde::{Deserialize, Serialize};

use crate::config::RuptureConfig;
use crate::relationship::{ClassifiedEvent, Deltas, RelationshipEvent, Sentiment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuptureCause {
    SingleEvent,
    Cumulative,
}

pub struct RuptureRepairDetector<'a> {
    config: &'a RuptureConfig,
}

impl<'a> RuptureRepairDetector<'a> {
    pub fn new(config: &'a RuptureConfig) -> Self {
        Self { config }
    }

    /// Net score delta of this event plus the recent window.
    /// `recent` is newest first; only events inside `window_hours` count,
    /// and at most `window_events - 1` of them.
    pub fn window_total(&self, raw: &Deltas, recent: &[RelationshipEvent], now: i64) -> f64 {
        let since = now - self.config.window_secs();
        raw.score
            + recent
                .iter()
                .filter(|e| e.created_at >= since)
                .take(self.config.window_events.saturating_sub(1))
                .map(|e| e.deltas.score)
                .sum::<f64>()
    }

    /// Does this event rupture a currently intact relationship?
    pub fn detect(&self, raw: &Deltas, recent: &[RelationshipEvent], now: i64) -> Option<RuptureCause> {
        if raw.score < self.config.severity_threshold {
            return Some(RuptureCause::SingleEvent);
        }
        if raw.score < 0.0 && self.window_total(raw, recent, now) < self.config.cumulative_threshold {
            return Some(RuptureCause::Cumulative);
        }
        None
    }

    /// Is this a strongly-positive reparative event?
    pub fn is_repair(&self, event: &ClassifiedEvent, raw: &Deltas) -> bool {
        event.action_type.is_reparative()
            && event.sentiment_toward_persona == Sentiment::Positive
            && raw.score >= self.config.repair_min_score_delta
    }

    /// Damp gains and amplify losses on warmth, trust and stability.
    pub fn penalise(&self, raw: &Deltas) -> Deltas {
        let scale = |v: f64| {
            if v > 0.0 {
                v * self.config.gain_multiplier
            } else {
                v * self.config.loss_multiplier
            }
        };
        Deltas {
            score: raw.score,
            warmth: scale(raw.warmth),
            trust: scale(raw.trust),
            playfulness: raw.playfulness,
            stability: scale(raw.stability),
        }
    }

    pub fn repair_bonus(&self) -> Deltas {
        Deltas {
            trust: self.config.repair_trust_bonus,
            stability: self.config.repair_stability_bonus,
            ..Deltas::default()
        }
    }
}
