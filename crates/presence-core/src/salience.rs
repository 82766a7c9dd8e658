//! Loop priority: initial salience and diminishing-returns boosts.
//!
//! A loop mentioned N times in one turn gains `Σ base/2^(i-1)` for i = 1..N,
//! so repeated mentions help but can never add more than `2 × base`. A loop
//! the user just talked about can overtake a stale loop that started higher.

use crate::config::LoopConfig;
use crate::open_loop::{LoopKind, clamp_salience};
use crate::topic::TopicMatcher;

pub struct SalienceEngine<'a> {
    config: &'a LoopConfig,
}

impl<'a> SalienceEngine<'a> {
    pub fn new(config: &'a LoopConfig) -> Self {
        Self { config }
    }

    /// Starting salience: the analyzer's value if given, else the per-kind default.
    pub fn initial(&self, kind: LoopKind, requested: Option<f64>) -> f64 {
        clamp_salience(requested.unwrap_or_else(|| self.config.initial_salience.for_kind(kind)))
    }

    /// Total boost for `matches` mentions in a single call.
    pub fn boost_amount(&self, matches: usize) -> f64 {
        (0..matches)
            .map(|i| self.config.boost_base / 2f64.powi(i as i32))
            .sum()
    }

    /// Salience after a boost, clamped at 1.0.
    pub fn boosted(&self, current: f64, matches: usize) -> f64 {
        clamp_salience(current + self.boost_amount(matches))
    }

    /// How many of the (normalized) mentioned topics match a loop's topic.
    pub fn count_matches(&self, loop_topic: &str, mentioned: &[String], matcher: &TopicMatcher) -> usize {
        mentioned
            .iter()
            .filter(|m| matcher.matches(loop_topic, m))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_boost_series() {
        let config = LoopConfig::default();
        let engine = SalienceEngine::new(&config);
        assert_relative_eq!(engine.boosted(0.5, 1), 0.6, epsilon = 1e-12);
        assert_relative_eq!(engine.boosted(0.5, 2), 0.65, epsilon = 1e-12);
        assert_relative_eq!(engine.boosted(0.5, 3), 0.675, epsilon = 1e-12);
    }

    #[test]
    fn test_boost_zero_matches_is_noop() {
        let config = LoopConfig::default();
        let engine = SalienceEngine::new(&config);
        assert_eq!(engine.boosted(0.42, 0), 0.42);
    }

    #[test]
    fn test_boost_clamps_at_one() {
        let config = LoopConfig::default();
        let engine = SalienceEngine::new(&config);
        assert_eq!(engine.boosted(0.95, 5), 1.0);
    }

    #[test]
    fn test_boost_bounded_by_twice_base() {
        let config = LoopConfig::default();
        let engine = SalienceEngine::new(&config);
        assert!(engine.boost_amount(60) < 2.0 * config.boost_base);
    }

    #[test]
    fn test_fresh_mention_overtakes_stale_loop() {
        let config = LoopConfig::default();
        let engine = SalienceEngine::new(&config);
        let stale = 0.68;
        let fresh = engine.boosted(0.6, 2);
        assert!(fresh > stale);
    }

    #[test]
    fn test_initial_uses_kind_default() {
        let config = LoopConfig::default();
        let engine = SalienceEngine::new(&config);
        assert_eq!(engine.initial(LoopKind::EmotionalFollowup, None), 0.7);
        assert_eq!(engine.initial(LoopKind::PendingEvent, Some(1.7)), 1.0);
    }

    #[test]
    fn test_count_matches() {
        let config = LoopConfig::default();
        let engine = SalienceEngine::new(&config);
        let matcher = TopicMatcher::new(config.topic_match_threshold);
        let mentioned = vec![
            "holiday party".to_string(),
            "holiday party".to_string(),
            "taxes".to_string(),
        ];
        assert_eq!(engine.count_matches("holiday party", &mentioned, &matcher), 2);
    }
}
