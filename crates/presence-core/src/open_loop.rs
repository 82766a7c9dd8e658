use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LoopConfig;
use crate::time::SECS_PER_DAY;

/// What kind of follow-up a loop represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    PendingEvent,
    EmotionalFollowup,
    CommitmentCheck,
    CuriosityThread,
}

impl LoopKind {
    pub const ALL: [LoopKind; 4] = [
        LoopKind::PendingEvent,
        LoopKind::EmotionalFollowup,
        LoopKind::CommitmentCheck,
        LoopKind::CuriosityThread,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::PendingEvent => "pending_event",
            LoopKind::EmotionalFollowup => "emotional_followup",
            LoopKind::CommitmentCheck => "commitment_check",
            LoopKind::CuriosityThread => "curiosity_thread",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Active,
    Surfaced,
    Resolved,
    Dismissed,
    Expired,
}

impl LoopStatus {
    pub const ALL: [LoopStatus; 5] = [
        LoopStatus::Active,
        LoopStatus::Surfaced,
        LoopStatus::Resolved,
        LoopStatus::Dismissed,
        LoopStatus::Expired,
    ];

    /// Statuses in which a loop still counts toward the one-per-topic rule.
    pub const OPEN: [LoopStatus; 2] = [LoopStatus::Active, LoopStatus::Surfaced];

    pub const TERMINAL: [LoopStatus; 3] = [
        LoopStatus::Resolved,
        LoopStatus::Dismissed,
        LoopStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Active => "active",
            LoopStatus::Surfaced => "surfaced",
            LoopStatus::Resolved => "resolved",
            LoopStatus::Dismissed => "dismissed",
            LoopStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional fields supplied when creating a loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopOptions {
    pub trigger_context: String,
    pub suggested_phrasing: Option<String>,
    pub salience: Option<f64>,
    pub max_surfaces: Option<u32>,
    pub should_surface_after: Option<i64>,
    pub expires_at: Option<i64>,
    pub event_datetime: Option<i64>,
}

/// A deferred follow-up with the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLoop {
    pub id: Uuid,
    pub user_id: String,
    pub kind: LoopKind,
    /// Normalized topic; the dedup key.
    pub topic: String,
    pub trigger_context: String,
    pub suggested_phrasing: Option<String>,
    pub salience: f64,
    pub surface_count: u32,
    pub max_surfaces: u32,
    pub created_at: i64,
    pub should_surface_after: i64,
    pub expires_at: i64,
    pub last_surfaced_at: Option<i64>,
    /// Last time the user brought the topic up again (merge or boost).
    pub last_mentioned_at: Option<i64>,
    pub status: LoopStatus,
    pub event_datetime: Option<i64>,
    /// Idle days already charged against salience since the last mention.
    #[serde(default)]
    pub salience_decayed_days: u32,
}

/// Clamp a salience into [0, 1]; NaN becomes 0.
pub fn clamp_salience(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl OpenLoop {
    /// Build a fresh active loop. `topic` must already be normalized.
    pub fn new(
        user_id: &str,
        kind: LoopKind,
        topic: &str,
        salience: f64,
        opts: LoopOptions,
        now: i64,
        config: &LoopConfig,
    ) -> Self {
        let expires_at = opts
            .expires_at
            .unwrap_or_else(|| default_expiry(kind, opts.event_datetime, now, config));
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            topic: topic.to_string(),
            trigger_context: opts.trigger_context,
            suggested_phrasing: opts.suggested_phrasing,
            salience,
            surface_count: 0,
            max_surfaces: opts.max_surfaces.unwrap_or(config.default_max_surfaces),
            created_at: now,
            should_surface_after: opts.should_surface_after.unwrap_or(now),
            expires_at,
            last_surfaced_at: None,
            last_mentioned_at: None,
            status: LoopStatus::Active,
            event_datetime: opts.event_datetime,
            salience_decayed_days: 0,
        }
        .clamped()
    }

    /// Restore every numeric invariant. Applied at each write boundary.
    pub fn clamped(mut self) -> Self {
        self.salience = clamp_salience(self.salience);
        self.max_surfaces = self.max_surfaces.max(1);
        self.surface_count = self.surface_count.min(self.max_surfaces);
        self
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Start of the current idle period for salience decay.
    pub fn recency_anchor(&self) -> i64 {
        self.last_mentioned_at.unwrap_or(self.created_at)
    }
}

/// Expiry used when the caller does not supply one.
pub fn default_expiry(
    kind: LoopKind,
    event_datetime: Option<i64>,
    now: i64,
    config: &LoopConfig,
) -> i64 {
    match (kind, event_datetime) {
        (_, Some(event)) => event
            .max(now)
            .saturating_add(config.event_expiry_days.saturating_mul(SECS_PER_DAY)),
        _ => now.saturating_add(config.default_lifetime_days.saturating_mul(SECS_PER_DAY)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoopConfig {
        LoopConfig::default()
    }

    #[test]
    fn test_kind_string_roundtrip() {
        for kind in LoopKind::ALL {
            assert_eq!(LoopKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(LoopKind::parse("nonsense"), None);
    }

    #[test]
    fn test_status_partition() {
        for status in LoopStatus::ALL {
            assert_ne!(status.is_open(), LoopStatus::TERMINAL.contains(&status));
            assert_eq!(LoopStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_new_loop_defaults() {
        let l = OpenLoop::new(
            "u1",
            LoopKind::CommitmentCheck,
            "gym",
            0.5,
            LoopOptions::default(),
            1_000,
            &config(),
        );
        assert_eq!(l.status, LoopStatus::Active);
        assert_eq!(l.surface_count, 0);
        assert_eq!(l.max_surfaces, 2);
        assert_eq!(l.should_surface_after, 1_000);
        assert_eq!(l.expires_at, 1_000 + 14 * SECS_PER_DAY);
        assert_eq!(l.recency_anchor(), 1_000);
    }

    #[test]
    fn test_event_loop_expires_after_event() {
        let event = 50 * SECS_PER_DAY;
        let l = OpenLoop::new(
            "u1",
            LoopKind::PendingEvent,
            "exam",
            0.6,
            LoopOptions {
                event_datetime: Some(event),
                ..Default::default()
            },
            0,
            &config(),
        );
        assert_eq!(l.expires_at, event + 3 * SECS_PER_DAY);
    }

    #[test]
    fn test_far_future_event_saturates_expiry() {
        let l = OpenLoop::new(
            "u1",
            LoopKind::PendingEvent,
            "launch",
            0.6,
            LoopOptions {
                event_datetime: Some(i64::MAX - 10),
                ..Default::default()
            },
            1_750_000_000,
            &config(),
        );
        assert_eq!(l.expires_at, i64::MAX);
        assert!(l.is_open());
    }

    #[test]
    fn test_clamped_restores_invariants() {
        let mut l = OpenLoop::new(
            "u1",
            LoopKind::CuriosityThread,
            "x",
            0.3,
            LoopOptions::default(),
            0,
            &config(),
        );
        l.salience = 4.0;
        l.max_surfaces = 0;
        l.surface_count = 9;
        let l = l.clamped();
        assert_eq!(l.salience, 1.0);
        assert_eq!(l.max_surfaces, 1);
        assert_eq!(l.surface_count, 1);
    }

    #[test]
    fn test_clamp_salience_nan() {
        assert_eq!(clamp_salience(f64::NAN), 0.0);
        assert_eq!(clamp_salience(-0.2), 0.0);
    }

    #[test]
    fn test_serde_roundtrip() {
        let l = OpenLoop::new(
            "u1",
            LoopKind::EmotionalFollowup,
            "breakup",
            0.7,
            LoopOptions {
                suggested_phrasing: Some("how are you holding up".to_string()),
                ..Default::default()
            },
            42,
            &config(),
        );
        let json = serde_json::to_string(&l).unwrap();
        let back: OpenLoop = serde_json::from_str(&json).unwrap();
        assert_eq!(l, back);
        assert!(json.contains("\"emotional_followup\""));
    }
}
