use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::relationship::FamiliarityStage;

/// A behavioural pattern observed about a user, e.g. ("work", "stress_on_mondays").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub id: Uuid,
    pub user_id: String,
    pub subject: String,
    pub pattern_key: String,
    pub observation_count: u32,
    pub confidence: f64,
    pub first_observed_at: i64,
    pub last_observed_at: i64,
}

/// One sighting of a pattern, as reported by the intent analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightObservation {
    pub subject: String,
    pub pattern_key: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Insights worth handing to the response layer. Nothing is shared until
/// the relationship is established.
pub fn top_insights(
    records: &[InsightRecord],
    familiarity: FamiliarityStage,
    min_observations: u32,
    limit: usize,
) -> Vec<InsightRecord> {
    if familiarity != FamiliarityStage::Established {
        return Vec::new();
    }
    let mut eligible: Vec<_> = records
        .iter()
        .filter(|r| r.observation_count >= min_observations)
        .cloned()
        .collect();
    eligible.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(b.observation_count.cmp(&a.observation_count))
            .then(b.last_observed_at.cmp(&a.last_observed_at))
    });
    eligible.truncate(limit);
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, count: u32, confidence: f64) -> InsightRecord {
        InsightRecord {
            id: Uuid::new_v4(),
            user_id: "u".to_string(),
            subject: "work".to_string(),
            pattern_key: key.to_string(),
            observation_count: count,
            confidence,
            first_observed_at: 0,
            last_observed_at: 0,
        }
    }

    #[test]
    fn test_hidden_until_established() {
        let records = vec![record("a", 10, 0.9)];
        assert!(top_insights(&records, FamiliarityStage::Developing, 3, 3).is_empty());
        assert_eq!(top_insights(&records, FamiliarityStage::Established, 3, 3).len(), 1);
    }

    #[test]
    fn test_ranked_and_limited() {
        let records = vec![
            record("low", 5, 0.3),
            record("rare", 1, 0.99),
            record("high", 4, 0.8),
            record("mid", 9, 0.6),
        ];
        let top = top_insights(&records, FamiliarityStage::Established, 3, 2);
        let keys: Vec<_> = top.iter().map(|r| r.pattern_key.as_str()).collect();
        assert_eq!(keys, ["high", "mid"]);
    }

    #[test]
    fn test_observation_default_confidence() {
        let o: InsightObservation =
            serde_json::from_str(r#"{"subject":"sleep","patternKey":"late_nights"}"#).unwrap();
        assert_eq!(o.confidence, 0.5);
    }
}
