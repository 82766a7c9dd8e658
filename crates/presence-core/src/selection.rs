use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::config::LoopConfig;
use crate::open_loop::OpenLoop;
use crate::time_gate::{FollowUpType, TimeGate};

/// Why a loop cannot be surfaced right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligible {
    Closed,
    Expired,
    SurfaceLimit,
    SurfacedRecently,
    NotYetDue,
    EventInProgress,
}

/// The loop chosen for surfacing and how to frame it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedLoop {
    #[serde(rename = "loop")]
    pub open_loop: OpenLoop,
    pub follow_up_type: FollowUpType,
}

/// Read-only filter and ranking over a user's loops.
pub struct LoopSelector<'a> {
    config: &'a LoopConfig,
    gate: TimeGate,
}

impl<'a> LoopSelector<'a> {
    pub fn new(config: &'a LoopConfig) -> Self {
        Self {
            config,
            gate: TimeGate::new(config),
        }
    }

    /// Run the eligibility filters in order.
    pub fn check(&self, l: &OpenLoop, now: i64) -> Result<FollowUpType, Ineligible> {
        if !l.is_open() {
            return Err(Ineligible::Closed);
        }
        if l.expires_at <= now {
            return Err(Ineligible::Expired);
        }
        if l.surface_count >= l.max_surfaces {
            return Err(Ineligible::SurfaceLimit);
        }
        if let Some(last) = l.last_surfaced_at
            && now - last < self.config.min_surface_gap_secs()
        {
            return Err(Ineligible::SurfacedRecently);
        }
        if l.should_surface_after > now {
            return Err(Ineligible::NotYetDue);
        }
        self.gate
            .eligible_as(l, now)
            .ok_or(Ineligible::EventInProgress)
    }

    /// Highest salience wins; ties go to the oldest loop.
    pub fn select(&self, loops: &[OpenLoop], now: i64) -> Option<SelectedLoop> {
        loops
            .iter()
            .filter_map(|l| self.check(l, now).ok().map(|t| (l, t)))
            .min_by(|(a, _), (b, _)| rank(a, b))
            .map(|(l, t)| SelectedLoop {
                open_loop: l.clone(),
                follow_up_type: t,
            })
    }
}

/// Ordering where "less" means "surface first".
fn rank(a: &OpenLoop, b: &OpenLoop) -> Ordering {
    b.salience
        .total_cmp(&a.salience)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}
