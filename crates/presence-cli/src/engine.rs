//! Async facade over the store.
//!
//! Every call runs on the blocking pool with its own SQLite connection, so
//! independent work proceeds in parallel and writers are serialized by
//! SQLite itself. Conversation-path calls never fail: store trouble is
//! logged and the call degrades to "nothing happened this turn".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use presence_core::{
    Clock, EngineConfig, InsightRecord, LoopStatus, OngoingThread, OpenLoop, PriorityRouter,
    RelationshipEvent, RelationshipState, RuptureTransition, SurfacingContext, TurnSignals,
};
use presence_store::{
    ImportReport, OpenLoopTracker, RelationshipStore, RelationshipTracker, Store, StoreStats,
    SweepReport, ThreadStore, sweep_all,
};

/// What one turn changed.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// The loop created or merged into by this turn's intent.
    pub open_loop: Option<OpenLoop>,
    pub dismissed: usize,
    pub boosted: usize,
    pub relationship_state: Option<RelationshipState>,
    pub transition: Option<RuptureTransition>,
    pub insight: Option<InsightRecord>,
    /// Upstream fields that failed to parse and were ignored.
    pub dropped: Vec<String>,
}

#[derive(Default)]
struct LoopEffects {
    open_loop: Option<OpenLoop>,
    dismissed: usize,
    boosted: usize,
}

#[derive(Default)]
struct RelationshipEffects {
    state: Option<RelationshipState>,
    transition: Option<RuptureTransition>,
    insight: Option<InsightRecord>,
}

struct Inner {
    db_path: PathBuf,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct PresenceEngine {
    inner: Arc<Inner>,
}

impl PresenceEngine {
    /// Create the database if needed and migrate it.
    pub fn open(db_path: &Path, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Store::open(db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                db_path: db_path.to_path_buf(),
                config,
                clock,
            }),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Run `f` on the blocking pool against a fresh connection.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store, &dyn Clock, &EngineConfig) -> T + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || -> Result<T> {
            let store = Store::connect(&inner.db_path)
                .with_context(|| format!("failed to connect to {}", inner.db_path.display()))?;
            Ok(f(&store, inner.clock.as_ref(), &inner.config))
        })
        .await
        .context("store task panicked")?
    }

    /// Like `run`, but a failure is logged and replaced by `fallback`.
    async fn run_or<T, F>(&self, op: &'static str, fallback: T, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&Store, &dyn Clock, &EngineConfig) -> T + Send + 'static,
    {
        self.run(f).await.unwrap_or_else(|error| {
            warn!(op, "store task failed: {error:#}");
            fallback
        })
    }

    /// Fire-and-forget write. The handle is only for callers that want to wait.
    pub fn spawn_background<F>(&self, op: &'static str, f: F) -> JoinHandle<()>
    where
        F: FnOnce(&Store, &dyn Clock, &EngineConfig) + Send + 'static,
    {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(error) = engine.run(f).await {
                warn!(op, "background task failed: {error:#}");
            }
        })
    }

    /// Parse an upstream record leniently, then apply it.
    pub async fn process_turn_json(&self, user_id: &str, persona_id: &str, signals: &Value) -> TurnOutcome {
        let (parsed, dropped) = TurnSignals::parse_lenient(signals);
        if !dropped.is_empty() {
            warn!(user_id, ?dropped, "ignoring malformed turn signals");
        }
        let mut outcome = self.process_turn(user_id, persona_id, parsed).await;
        outcome.dropped = dropped;
        outcome
    }

    /// Apply one turn's signals. Loop bookkeeping and relationship scoring
    /// touch disjoint tables and run concurrently.
    pub async fn process_turn(&self, user_id: &str, persona_id: &str, signals: TurnSignals) -> TurnOutcome {
        let TurnSignals {
            open_loop_intent,
            contradiction_intent,
            relationship_signal,
            classified_event,
        } = signals;
        let (mentioned, insight) = match relationship_signal {
            Some(s) => (s.mentioned_topics, s.insight),
            None => (Vec::new(), None),
        };

        let user = user_id.to_string();
        let loops = self.run_or("turn loops", LoopEffects::default(), move |store, clock, config| {
            let tracker = OpenLoopTracker::new(store, clock, config);
            let mut fx = LoopEffects::default();
            if let Some(c) = &contradiction_intent {
                fx.dismissed = tracker.dismiss_by_topic(&user, &c.topic);
            }
            fx.boosted = tracker.boost_salience(&user, &mentioned);
            if let Some(intent) = &open_loop_intent {
                let opts = intent.to_options(clock.now());
                fx.open_loop = tracker.create(&user, intent.kind, &intent.topic, opts);
            }
            fx
        });

        let user = user_id.to_string();
        let persona = persona_id.to_string();
        let relationship = self.run_or(
            "turn relationship",
            RelationshipEffects::default(),
            move |store, clock, config| {
                let tracker = RelationshipTracker::new(store, clock, config);
                let mut fx = RelationshipEffects::default();
                if let Some(event) = &classified_event
                    && let Some(recorded) = tracker.record_event(&user, &persona, event)
                {
                    fx.state = Some(recorded.state);
                    fx.transition = recorded.transition;
                }
                if let Some(obs) = &insight {
                    fx.insight = tracker.record_insight(&user, obs);
                }
                fx
            },
        );

        let (loops, relationship) = tokio::join!(loops, relationship);
        self.defer_expiry(user_id);

        debug!(
            user_id,
            persona_id,
            dismissed = loops.dismissed,
            boosted = loops.boosted,
            created = loops.open_loop.is_some(),
            "turn processed"
        );
        TurnOutcome {
            open_loop: loops.open_loop,
            dismissed: loops.dismissed,
            boosted: loops.boosted,
            relationship_state: relationship.state,
            transition: relationship.transition,
            insight: relationship.insight,
            dropped: Vec::new(),
        }
    }

    /// Decide what, if anything, to raise proactively. Reads only; expiry
    /// runs afterwards in the background.
    pub async fn surface(&self, user_id: &str, persona_id: &str) -> SurfacingContext {
        let user = user_id.to_string();
        let top_loop = self.run_or("surface loops", None, move |store, clock, config| {
            OpenLoopTracker::new(store, clock, config).select(&user)
        });

        let (user, persona) = (user_id.to_string(), persona_id.to_string());
        let top_thread = self.run_or("surface threads", None, move |store, clock, config| {
            let threads = store
                .threads_for(&persona, &user)
                .inspect_err(|error| warn!(%error, user_id = %user, "thread read failed"))
                .unwrap_or_default();
            PriorityRouter::new(&config.router)
                .select_thread(&threads, clock.now())
                .cloned()
        });

        let (user, persona) = (user_id.to_string(), persona_id.to_string());
        let standing = self.run_or("surface relationship", (None, Vec::new()), move |store, clock, config| {
            let tracker = RelationshipTracker::new(store, clock, config);
            let state = tracker.get_state(&user, &persona);
            let insights = state
                .as_ref()
                .map(|s| tracker.top_insights(&user, s.familiarity))
                .unwrap_or_default();
            (state, insights)
        });

        let (top_loop, top_thread, (relationship_state, top_insights)) =
            tokio::join!(top_loop, top_thread, standing);
        self.defer_expiry(user_id);

        let chosen = PriorityRouter::new(&self.inner.config.router).route(top_loop.as_ref(), top_thread.as_ref());
        let follow_up_type = match (&chosen, &top_loop) {
            (Some(decision), Some(selected)) if decision.is_loop() => Some(selected.follow_up_type),
            _ => None,
        };
        SurfacingContext {
            chosen,
            follow_up_type,
            relationship_state,
            top_insights,
        }
    }

    fn defer_expiry(&self, user_id: &str) {
        let user = user_id.to_string();
        self.spawn_background("expire", move |store, clock, config| {
            OpenLoopTracker::new(store, clock, config).expire(&user);
        });
    }

    /// Count one surfacing of a loop, or record a mention of a thread.
    pub async fn mark_surfaced(&self, id: Uuid) -> bool {
        self.run_or("mark surfaced", false, move |store, clock, config| {
            if OpenLoopTracker::new(store, clock, config).mark_surfaced(id) {
                return true;
            }
            store
                .mark_thread_mentioned(id, clock.now())
                .inspect_err(|error| warn!(%error, %id, "thread mention failed"))
                .unwrap_or(false)
        })
        .await
    }

    pub async fn resolve_loop(&self, id: Uuid) -> bool {
        self.run_or("resolve", false, move |store, clock, config| {
            OpenLoopTracker::new(store, clock, config).resolve(id)
        })
        .await
    }

    pub async fn state(&self, user_id: &str, persona_id: &str) -> Option<RelationshipState> {
        let (user, persona) = (user_id.to_string(), persona_id.to_string());
        self.run_or("state", None, move |store, clock, config| {
            RelationshipTracker::new(store, clock, config).get_state(&user, &persona)
        })
        .await
    }

    /// Audit log for one relationship, newest first.
    pub async fn events(&self, user_id: &str, persona_id: &str, limit: usize) -> Result<Vec<RelationshipEvent>> {
        let (user, persona) = (user_id.to_string(), persona_id.to_string());
        Ok(self
            .run(move |store, _, _| store.recent_events(&user, &persona, 0, limit))
            .await??)
    }

    pub async fn loops(&self, user_id: &str, statuses: Vec<LoopStatus>) -> Vec<OpenLoop> {
        let user = user_id.to_string();
        self.run_or("loops", Vec::new(), move |store, clock, config| {
            OpenLoopTracker::new(store, clock, config).list(&user, &statuses)
        })
        .await
    }

    pub async fn add_thread(&self, persona_id: &str, user_id: &str, topic: &str, intensity: f64, user_related: bool) -> Result<OngoingThread> {
        let (persona, user, topic) = (persona_id.to_string(), user_id.to_string(), topic.to_string());
        self.run(move |store, clock, _| -> Result<OngoingThread> {
            let thread = OngoingThread::new(&persona, &user, &topic, intensity, user_related, clock.now());
            store.upsert_thread(&thread)?;
            Ok(thread)
        })
        .await?
    }

    pub async fn threads(&self, persona_id: &str, user_id: &str) -> Result<Vec<OngoingThread>> {
        let (persona, user) = (persona_id.to_string(), user_id.to_string());
        Ok(self.run(move |store, _, _| store.threads_for(&persona, &user)).await??)
    }

    pub async fn retire_thread(&self, id: Uuid) -> Result<bool> {
        Ok(self.run(move |store, _, _| store.retire_thread(id)).await??)
    }

    pub async fn sweep(&self) -> SweepReport {
        self.run_or("sweep", SweepReport::default(), |store, clock, config| {
            sweep_all(store, clock, config)
        })
        .await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(self.run(|store, _, _| store.stats()).await??)
    }

    pub async fn export_json(&self) -> Result<String> {
        Ok(self.run(|store, clock, _| store.export_json_string(clock.now())).await??)
    }

    pub async fn import_json(&self, json: String) -> Result<ImportReport> {
        Ok(self
            .run(move |store, clock, config| store.import_json_str(&json, &config.relationship, clock.now()))
            .await??)
    }
}
