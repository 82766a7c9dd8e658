//! Versioned JSON export format.
//!
//! Every persisted row travels as one record tagged with its collection, so
//! the payload is a discriminated union rather than a set of opaque blobs.
//! Import validates the version and restores invariants before anything
//! reaches a store.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RelationshipConfig;
use crate::insight::InsightRecord;
use crate::open_loop::{OpenLoop, clamp_salience};
use crate::relationship::{RelationshipEvent, RelationshipState};
use crate::router::OngoingThread;
use crate::time::unix_to_iso8601;

pub const WIRE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct WireExport {
    pub version: u32,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    pub records: Vec<WireRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "snake_case")]
pub enum WireRecord {
    OpenLoop(OpenLoop),
    RelationshipState(RelationshipState),
    RelationshipEvent(RelationshipEvent),
    InsightRecord(InsightRecord),
    OngoingThread(OngoingThread),
}

/// All collections, grouped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub loops: Vec<OpenLoop>,
    pub states: Vec<RelationshipState>,
    pub events: Vec<RelationshipEvent>,
    pub insights: Vec<InsightRecord>,
    pub threads: Vec<OngoingThread>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.loops.len() + self.states.len() + self.events.len() + self.insights.len() + self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_records(self) -> Vec<WireRecord> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.loops.into_iter().map(WireRecord::OpenLoop));
        out.extend(self.states.into_iter().map(WireRecord::RelationshipState));
        out.extend(self.events.into_iter().map(WireRecord::RelationshipEvent));
        out.extend(self.insights.into_iter().map(WireRecord::InsightRecord));
        out.extend(self.threads.into_iter().map(WireRecord::OngoingThread));
        out
    }

    fn from_records(records: Vec<WireRecord>, config: &RelationshipConfig) -> Self {
        let mut s = Snapshot::default();
        for r in records {
            match r {
                WireRecord::OpenLoop(l) => s.loops.push(l.clamped()),
                WireRecord::RelationshipState(mut st) => {
                    st.clamp(config);
                    s.states.push(st);
                }
                WireRecord::RelationshipEvent(e) => s.events.push(e),
                WireRecord::InsightRecord(mut i) => {
                    i.confidence = clamp_salience(i.confidence);
                    s.insights.push(i);
                }
                WireRecord::OngoingThread(mut t) => {
                    t.intensity = clamp_salience(t.intensity);
                    s.threads.push(t);
                }
            }
        }
        s
    }
}

#[derive(Debug)]
pub enum WireError {
    Json(serde_json::Error),
    UnsupportedVersion(u32),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Json(e) => write!(f, "malformed export: {e}"),
            WireError::UnsupportedVersion(v) => {
                write!(f, "unsupported export version {v} (expected {WIRE_VERSION})")
            }
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Json(e) => Some(e),
            WireError::UnsupportedVersion(_) => None,
        }
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Json(e)
    }
}

pub fn export_json(snapshot: Snapshot, now: i64) -> Result<String, serde_json::Error> {
    let wire = WireExport {
        version: WIRE_VERSION,
        exported_at: unix_to_iso8601(now),
        records: snapshot.into_records(),
    };
    serde_json::to_string_pretty(&wire)
}

pub fn import_json(json: &str, config: &RelationshipConfig) -> Result<Snapshot, WireError> {
    let wire: WireExport = serde_json::from_str(json)?;
    if wire.version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(wire.version));
    }
    Ok(Snapshot::from_records(wire.records, config))
}
