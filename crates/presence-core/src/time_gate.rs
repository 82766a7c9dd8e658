//! Eligibility of loops tied to a real-world event.
//!
//! A pending event is framed as a reminder while it is still ahead, is not
//! raised at all while it is happening, and only becomes a retrospective
//! follow-up ("how did it go?") once `event_datetime + buffer` has passed.

use serde::{Deserialize, Serialize};

use crate::config::LoopConfig;
use crate::open_loop::{LoopKind, OpenLoop};

/// How the response layer should frame a surfaced loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpType {
    /// The event is still upcoming.
    Reminder,
    /// The event (if any) has passed.
    Followup,
}

impl FollowUpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUpType::Reminder => "reminder",
            FollowUpType::Followup => "followup",
        }
    }
}

/// Where a loop sits relative to its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    /// No event date; eligible immediately.
    Undated,
    Upcoming,
    /// Between the event and the end of the buffer.
    InProgress,
    Elapsed,
}

pub struct TimeGate {
    buffer_secs: i64,
}

impl TimeGate {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            buffer_secs: config.event_buffer_secs(),
        }
    }

    pub fn phase(&self, open_loop: &OpenLoop, now: i64) -> EventPhase {
        match (open_loop.kind, open_loop.event_datetime) {
            (LoopKind::PendingEvent, Some(event)) => {
                if now < event {
                    EventPhase::Upcoming
                } else if now < event.saturating_add(self.buffer_secs) {
                    EventPhase::InProgress
                } else {
                    EventPhase::Elapsed
                }
            }
            _ => EventPhase::Undated,
        }
    }

    /// The framing a loop may be surfaced with right now, or `None` if it is gated.
    pub fn eligible_as(&self, open_loop: &OpenLoop, now: i64) -> Option<FollowUpType> {
        match self.phase(open_loop, now) {
            EventPhase::Upcoming => Some(FollowUpType::Reminder),
            EventPhase::InProgress => None,
            EventPhase::Undated | EventPhase::Elapsed => Some(FollowUpType::Followup),
        }
    }

    /// `reminder` until the buffer after the event has elapsed, `followup` after.
    pub fn follow_up_type(&self, open_loop: &OpenLoop, now: i64) -> FollowUpType {
        match self.phase(open_loop, now) {
            EventPhase::Upcoming | EventPhase::InProgress => FollowUpType::Reminder,
            EventPhase::Undated | EventPhase::Elapsed => FollowUpType::Followup,
        }
    }
}
