use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Normalize a topic into its dedup key.
/// Case-folds, strips punctuation, collapses whitespace and lightly stems each word.
pub fn normalize_topic(topic: &str) -> String {
    let cleaned = NON_WORD.replace_all(topic, " ");
    cleaned
        .to_lowercase()
        .split_whitespace()
        .map(stem)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Light suffix stripping: plural forms first, then `-ing` / `-ed`.
/// Deliberately conservative; both sides of a comparison go through the same rules.
pub fn stem(word: &str) -> String {
    let w = strip_plural(word);
    strip_verbal(&w)
}

fn strip_plural(word: &str) -> String {
    let n = word.chars().count();
    if n <= 3 {
        return word.to_string();
    }
    if let Some(base) = word.strip_suffix("ies")
        && n > 4
    {
        return format!("{base}y");
    }
    if let Some(base) = word.strip_suffix("sses") {
        return format!("{base}ss");
    }
    if let Some(base) = word.strip_suffix("es")
        && ["s", "x", "z", "ch", "sh"].iter().any(|s| base.ends_with(s))
    {
        return base.to_string();
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(base) => base.to_string(),
        None => word.to_string(),
    }
}

fn strip_verbal(word: &str) -> String {
    let n = word.chars().count();
    if n > 5
        && let Some(base) = word.strip_suffix("ing")
    {
        return base.to_string();
    }
    if n > 4
        && let Some(base) = word.strip_suffix("ed")
    {
        return base.to_string();
    }
    word.to_string()
}

/// Similarity of two already-normalized topics in [0, 1].
///
/// The maximum of token-set Jaccard and character-bigram Dice: the first
/// catches reordered words, the second small spelling differences.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    token_jaccard(a, b).max(bigram_dice(a, b))
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

fn bigrams(s: &str) -> HashMap<(char, char), usize> {
    let chars: Vec<char> = s.chars().collect();
    let mut counts = HashMap::new();
    for pair in chars.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

fn bigram_dice(a: &str, b: &str) -> f64 {
    let ba = bigrams(a);
    let bb = bigrams(b);
    let total: usize = ba.values().sum::<usize>() + bb.values().sum::<usize>();
    if total == 0 {
        return 0.0;
    }
    let shared: usize = ba
        .iter()
        .map(|(k, &n)| n.min(bb.get(k).copied().unwrap_or(0)))
        .sum();
    2.0 * shared as f64 / total as f64
}

/// Fuzzy topic equality used for loop dedup, boosting and dismissal.
#[derive(Debug, Clone, Copy)]
pub struct TopicMatcher {
    threshold: f64,
}

impl TopicMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Compare two normalized topics.
    pub fn matches(&self, a: &str, b: &str) -> bool {
        similarity(a, b) >= self.threshold
    }

    /// Compare a normalized key against a raw, un-normalized topic.
    pub fn matches_raw(&self, normalized: &str, raw: &str) -> bool {
        self.matches(normalized, &normalize_topic(raw))
    }

    /// Index and score of the most similar candidate at or above the threshold.
    pub fn best_match<'a, I>(&self, topic: &str, candidates: I) -> Option<(usize, f64)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| (i, similarity(topic, c)))
            .filter(|(_, s)| *s >= self.threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_case_and_punctuation() {
        assert_eq!(normalize_topic("  Holiday Party!! "), "holiday party");
        assert_eq!(normalize_topic("Mom's   surgery"), "mom s surgery");
    }

    #[test]
    fn test_plural_stemming() {
        assert_eq!(stem("parties"), "party");
        assert_eq!(stem("party"), "party");
        assert_eq!(stem("boxes"), "box");
        assert_eq!(stem("classes"), "class");
        assert_eq!(stem("bus"), "bus");
        assert_eq!(stem("interviews"), "interview");
    }

    #[test]
    fn test_verbal_stemming() {
        assert_eq!(stem("meetings"), "meet");
        assert_eq!(stem("meeting"), "meet");
        assert_eq!(stem("moved"), "mov");
        assert_eq!(stem("red"), "red");
        assert_eq!(stem("sing"), "sing");
    }

    #[test]
    fn test_near_identical_topics_normalize_equal() {
        assert_eq!(
            normalize_topic("holiday party"),
            normalize_topic("Holiday Parties")
        );
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("a b", "a b"), 1.0);
        assert_eq!(similarity("", "x"), 0.0);
        let s = similarity("job interview", "dentist appointment");
        assert!((0.0..0.5).contains(&s), "unrelated topics scored {s}");
    }

    #[test]
    fn test_word_order_insensitive() {
        let a = normalize_topic("sister wedding");
        let b = normalize_topic("wedding sister");
        assert_eq!(similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_small_typo_matches() {
        let m = TopicMatcher::new(0.8);
        assert!(m.matches_raw(&normalize_topic("job interview"), "job intervew"));
        assert!(!m.matches_raw(&normalize_topic("job interview"), "new job"));
    }

    #[test]
    fn test_best_match_picks_highest() {
        let m = TopicMatcher::new(0.5);
        let topic = normalize_topic("marathon training");
        let candidates: Vec<String> = ["marathon", "marathon training", "cooking"]
            .iter()
            .map(|c| normalize_topic(c))
            .collect();
        let (idx, score) = m
            .best_match(&topic, candidates.iter().map(String::as_str))
            .unwrap();
        assert_eq!(idx, 1);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_best_match_none_below_threshold() {
        let m = TopicMatcher::new(0.8);
        assert!(m.best_match("garden", ["taxes", "vacation"]).is_none());
    }
}
