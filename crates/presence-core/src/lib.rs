//! Presence and relationship state engine.
//!
//! Decides what a companion persona should follow up on (open loops), how
//! it stands with a user (relationship score, dimensions, tier, rupture),
//! and which single proactive item to raise next (priority routing).
//!
//! Zero I/O: every function takes explicit inputs and the current time.
//! Persistence and scheduling live in `presence-store` and `presence-cli`.

pub mod config;
pub mod decay;
pub mod insight;
pub mod open_loop;
pub mod relationship;
pub mod router;
pub mod rupture;
pub mod salience;
pub mod scorer;
pub mod selection;
pub mod signals;
pub mod time;
pub mod time_gate;
pub mod topic;
pub mod wire;

pub use config::{
    ConfigError, DecayConfig, EngineConfig, LoopConfig, RelationshipConfig, RouterConfig,
    RuptureConfig, SweepConfig,
};
pub use decay::{DecayScheduler, LoopDecay};
pub use insight::{InsightObservation, InsightRecord, top_insights};
pub use open_loop::{LoopKind, LoopOptions, LoopStatus, OpenLoop, clamp_salience};
pub use relationship::{
    ActionType, ClassifiedEvent, Deltas, Dimensions, FamiliarityStage, RelationshipEvent,
    RelationshipState, Sentiment, Tier, UserMood,
};
pub use router::{
    OngoingThread, PriorityRouter, RouteReason, SurfaceDecision, SurfaceTarget, ThreadStatus,
};
pub use rupture::{RuptureCause, RuptureRepairDetector};
pub use salience::SalienceEngine;
pub use scorer::{RelationshipScorer, RuleTable, RuptureTransition, ScoreOutcome};
pub use selection::{Ineligible, LoopSelector, SelectedLoop};
pub use signals::{
    ContradictionIntent, EventTime, OpenLoopIntent, RelationshipSignal, SurfacingContext,
    TurnSignals,
};
pub use time::{Clock, ManualClock, SystemClock};
pub use time_gate::{EventPhase, FollowUpType, TimeGate};
pub use topic::{TopicMatcher, normalize_topic, similarity};
pub use wire::{Snapshot, WIRE_VERSION, WireError, export_json, import_json};
