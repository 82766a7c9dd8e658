//! Choosing the single proactive item to raise.
//!
//! Two sources compete: the best eligible open loop (the user's needs) and
//! the best eligible ongoing thread (the persona's own musings). A loop
//! above the high-priority threshold always wins, whatever the thread's
//! intensity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::selection::SelectedLoop;
use crate::time::SECS_PER_HOUR;
use crate::time_gate::FollowUpType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Retired,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ThreadStatus::Active),
            "retired" => Some(ThreadStatus::Retired),
            _ => None,
        }
    }
}

/// A lower-stakes, persona-originated topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OngoingThread {
    pub id: Uuid,
    pub persona_id: String,
    pub user_id: String,
    pub topic: String,
    /// 0..1, how much the persona wants to bring it up.
    pub intensity: f64,
    /// Whether the thread connects to something the user shared.
    pub user_related: bool,
    pub created_at: i64,
    pub last_mentioned_at: Option<i64>,
    pub status: ThreadStatus,
}

impl OngoingThread {
    pub fn new(persona_id: &str, user_id: &str, topic: &str, intensity: f64, user_related: bool, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            persona_id: persona_id.to_string(),
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            intensity: crate::open_loop::clamp_salience(intensity),
            user_related,
            created_at: now,
            last_mentioned_at: None,
            status: ThreadStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceTarget {
    Loop {
        id: Uuid,
        topic: String,
        follow_up_type: FollowUpType,
        salience: f64,
    },
    Thread {
        id: Uuid,
        topic: String,
        intensity: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// Loop above the high-priority threshold.
    HighPriorityLoop,
    Thread,
    /// Lower-salience loop, no eligible thread.
    Loop,
}

/// The one item to surface. The caller marks `id()` surfaced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceDecision {
    pub target: SurfaceTarget,
    pub reason: RouteReason,
}

impl SurfaceDecision {
    pub fn id(&self) -> Uuid {
        match &self.target {
            SurfaceTarget::Loop { id, .. } | SurfaceTarget::Thread { id, .. } => *id,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self.target, SurfaceTarget::Loop { .. })
    }
}

pub struct PriorityRouter<'a> {
    config: &'a RouterConfig,
}

impl<'a> PriorityRouter<'a> {
    pub fn new(config: &'a RouterConfig) -> Self {
        Self { config }
    }

    pub fn thread_score(&self, t: &OngoingThread) -> f64 {
        if t.user_related {
            t.intensity + self.config.user_related_bonus
        } else {
            t.intensity
        }
    }

    pub fn is_thread_eligible(&self, t: &OngoingThread, now: i64) -> bool {
        let c = self.config;
        t.status == ThreadStatus::Active
            && self.thread_score(t) >= c.thread_min_intensity
            && now - t.created_at >= c.thread_min_age_hours * SECS_PER_HOUR
            && t.last_mentioned_at
                .is_none_or(|at| now - at >= c.thread_min_gap_hours * SECS_PER_HOUR)
    }

    /// Highest-scoring eligible thread; ties go to the oldest.
    pub fn select_thread<'t>(&self, threads: &'t [OngoingThread], now: i64) -> Option<&'t OngoingThread> {
        threads
            .iter()
            .filter(|t| self.is_thread_eligible(t, now))
            .min_by(|a, b| {
                self.thread_score(b)
                    .total_cmp(&self.thread_score(a))
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
    }

    pub fn route(&self, top_loop: Option<&SelectedLoop>, top_thread: Option<&OngoingThread>) -> Option<SurfaceDecision> {
        let as_loop = |s: &SelectedLoop, reason| SurfaceDecision {
            target: SurfaceTarget::Loop {
                id: s.open_loop.id,
                topic: s.open_loop.topic.clone(),
                follow_up_type: s.follow_up_type,
                salience: s.open_loop.salience,
            },
            reason,
        };

        if let Some(s) = top_loop
            && s.open_loop.salience > self.config.high_priority_threshold
        {
            return Some(as_loop(s, RouteReason::HighPriorityLoop));
        }
        if let Some(t) = top_thread {
            return Some(SurfaceDecision {
                target: SurfaceTarget::Thread {
                    id: t.id,
                    topic: t.topic.clone(),
                    intensity: t.intensity,
                },
                reason: RouteReason::Thread,
            });
        }
        top_loop.map(|s| as_loop(s, RouteReason::Loop))
    }
}
