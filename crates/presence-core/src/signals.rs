//! Records exchanged with the collaborators on either side of the engine.
//!
//! Upstream, the intent analyzer hands over one [`TurnSignals`] per turn.
//! Downstream, the response layer receives a [`SurfacingContext`]. Neither
//! carries raw text for the engine to interpret.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::insight::{InsightObservation, InsightRecord};
use crate::open_loop::{LoopKind, LoopOptions};
use crate::relationship::{ClassifiedEvent, RelationshipState};
use crate::router::SurfaceDecision;
use crate::time::{MAX_UNIX_SECS, SECS_PER_HOUR, parse_iso8601};
use crate::time_gate::FollowUpType;

/// Either unix seconds or an ISO-8601 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    Unix(i64),
    Iso(String),
}

impl EventTime {
    /// Unix seconds, or `None` when unparseable or outside 1970..=9999.
    pub fn to_unix(&self) -> Option<i64> {
        let secs = match self {
            EventTime::Unix(secs) => Some(*secs),
            EventTime::Iso(s) => parse_iso8601(s),
        }?;
        (0..=MAX_UNIX_SECS).contains(&secs).then_some(secs)
    }
}

/// Longest lifetime an analyzer may request for a loop: ten years.
pub const MAX_EXPIRES_IN_HOURS: i64 = 10 * 365 * 24;

/// Something the user said that deserves a later follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLoopIntent {
    pub kind: LoopKind,
    pub topic: String,
    #[serde(default)]
    pub trigger_context: String,
    #[serde(default)]
    pub suggested_phrasing: Option<String>,
    #[serde(default)]
    pub salience: Option<f64>,
    /// Supplied by the calendar collaborator for pending events.
    #[serde(default, alias = "eventDateTime")]
    pub event_datetime: Option<EventTime>,
    #[serde(default)]
    pub max_surfaces: Option<u32>,
    #[serde(default)]
    pub expires_in_hours: Option<i64>,
}

impl OpenLoopIntent {
    /// Time fields are usable: a supplied event time resolves to a date in
    /// range and the requested lifetime is between zero and ten years.
    pub fn has_valid_times(&self) -> bool {
        self.event_datetime.as_ref().is_none_or(|t| t.to_unix().is_some())
            && self
                .expires_in_hours
                .is_none_or(|h| (0..=MAX_EXPIRES_IN_HOURS).contains(&h))
    }

    pub fn to_options(&self, now: i64) -> LoopOptions {
        LoopOptions {
            trigger_context: self.trigger_context.clone(),
            suggested_phrasing: self.suggested_phrasing.clone(),
            salience: self.salience,
            max_surfaces: self.max_surfaces,
            should_surface_after: None,
            expires_at: self
                .expires_in_hours
                .map(|h| now.saturating_add(h.clamp(0, MAX_EXPIRES_IN_HOURS) * SECS_PER_HOUR)),
            event_datetime: self.event_datetime.as_ref().and_then(EventTime::to_unix),
        }
    }
}

/// The user contradicted the premise of a loop ("the party got cancelled").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContradictionIntent {
    pub topic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSignal {
    #[serde(default)]
    pub mentioned_topics: Vec<String>,
    #[serde(default)]
    pub insight: Option<InsightObservation>,
}

/// Structured analyzer output for one turn. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSignals {
    #[serde(default)]
    pub open_loop_intent: Option<OpenLoopIntent>,
    #[serde(default)]
    pub contradiction_intent: Option<ContradictionIntent>,
    #[serde(default)]
    pub relationship_signal: Option<RelationshipSignal>,
    #[serde(default)]
    pub classified_event: Option<ClassifiedEvent>,
}

impl TurnSignals {
    /// Decode each field on its own. A malformed field becomes "no signal"
    /// and its name is returned in the second element.
    pub fn parse_lenient(value: &Value) -> (TurnSignals, Vec<String>) {
        let mut dropped = Vec::new();
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                dropped.push("<root>".to_string());
            }
            return (TurnSignals::default(), dropped);
        };
        let signals = TurnSignals {
            open_loop_intent: field::<OpenLoopIntent>(obj, "openLoopIntent", &mut dropped).filter(
                |intent| {
                    let ok = intent.has_valid_times();
                    if !ok {
                        dropped.push("openLoopIntent".to_string());
                    }
                    ok
                },
            ),
            contradiction_intent: field(obj, "contradictionIntent", &mut dropped),
            relationship_signal: field(obj, "relationshipSignal", &mut dropped),
            classified_event: field(obj, "classifiedEvent", &mut dropped),
        };
        (signals, dropped)
    }

    pub fn is_empty(&self) -> bool {
        self.open_loop_intent.is_none()
            && self.contradiction_intent.is_none()
            && self.relationship_signal.is_none()
            && self.classified_event.is_none()
    }
}

fn field<T: DeserializeOwned>(
    obj: &serde_json::Map<String, Value>,
    name: &str,
    dropped: &mut Vec<String>,
) -> Option<T> {
    match obj.get(name) {
        None | Some(Value::Null) => None,
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                dropped.push(name.to_string());
                None
            }
        },
    }
}

/// What the response layer gets to work with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfacingContext {
    pub chosen: Option<SurfaceDecision>,
    pub follow_up_type: Option<FollowUpType>,
    pub relationship_state: Option<RelationshipState>,
    pub top_insights: Vec<InsightRecord>,
}
