//! Open-loop orchestration over an [`OpenLoopStore`].
//!
//! Bookkeeping must never abort a conversation: every store failure is
//! logged at `warn` and the call returns its neutral value (`None`, `0`,
//! `false`, empty). Reads never write.

use tracing::{debug, warn};
use uuid::Uuid;

use presence_core::time::SECS_PER_DAY;
use presence_core::{
    Clock, DecayScheduler, EngineConfig, FollowUpType, LoopKind, LoopOptions, LoopSelector,
    LoopStatus, OpenLoop, SalienceEngine, SelectedLoop, TimeGate, TopicMatcher, normalize_topic,
};

use crate::error::Result;
use crate::loops::OpenLoopStore;

pub struct OpenLoopTracker<'a, S: OpenLoopStore + ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
    config: &'a EngineConfig,
    matcher: TopicMatcher,
}

impl<'a, S: OpenLoopStore + ?Sized> OpenLoopTracker<'a, S> {
    pub fn new(store: &'a S, clock: &'a dyn Clock, config: &'a EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
            matcher: TopicMatcher::new(config.loops.topic_match_threshold),
        }
    }

    /// Create a loop, or refresh the open loop whose topic already matches.
    pub fn create(&self, user_id: &str, kind: LoopKind, topic: &str, opts: LoopOptions) -> Option<OpenLoop> {
        let key = normalize_topic(topic);
        if key.is_empty() {
            debug!(user_id, "ignoring loop with empty topic");
            return None;
        }
        self.try_create(user_id, kind, &key, opts)
            .inspect_err(|error| warn!(%error, user_id, topic, "loop create failed"))
            .ok()
            .flatten()
    }

    fn try_create(&self, user_id: &str, kind: LoopKind, key: &str, opts: LoopOptions) -> Result<Option<OpenLoop>> {
        let now = self.clock.now();
        if let Some(existing) = self.find_open(user_id, key)? {
            return self.refresh(existing, now).map(Some);
        }

        let salience = SalienceEngine::new(&self.config.loops).initial(kind, opts.salience);
        let fresh = OpenLoop::new(user_id, kind, key, salience, opts, now, &self.config.loops);
        if self.store.insert_loop(&fresh, now)? {
            debug!(user_id, topic = key, id = %fresh.id, "loop created");
            return Ok(Some(fresh));
        }

        // Lost a race with a concurrent insert of the same topic.
        match self.find_open(user_id, key)? {
            Some(existing) => self.refresh(existing, now).map(Some),
            None => Ok(None),
        }
    }

    fn find_open(&self, user_id: &str, key: &str) -> Result<Option<OpenLoop>> {
        let mut open = self.store.loops_for_user(user_id, &LoopStatus::OPEN)?;
        let best = self
            .matcher
            .best_match(key, open.iter().map(|l| l.topic.as_str()))
            .map(|(i, _)| i);
        Ok(best.map(|i| open.swap_remove(i)))
    }

    fn refresh(&self, mut existing: OpenLoop, now: i64) -> Result<OpenLoop> {
        if self.store.touch_loop(existing.id, now)? {
            existing.last_mentioned_at = Some(now);
            existing.salience_decayed_days = 0;
        }
        debug!(id = %existing.id, topic = %existing.topic, "merged into existing loop");
        Ok(existing)
    }

    /// Sweep this user's overdue loops to `expired`.
    pub fn expire(&self, user_id: &str) -> usize {
        self.store
            .expire_loops(Some(user_id), self.clock.now())
            .inspect_err(|error| warn!(%error, user_id, "loop expiry failed"))
            .unwrap_or(0)
    }

    /// The single best loop to surface right now. Never mutates.
    pub fn select(&self, user_id: &str) -> Option<SelectedLoop> {
        let loops = self
            .store
            .loops_for_user(user_id, &LoopStatus::OPEN)
            .inspect_err(|error| warn!(%error, user_id, "loop read failed"))
            .ok()?;
        LoopSelector::new(&self.config.loops).select(&loops, self.clock.now())
    }

    pub fn follow_up_type(&self, l: &OpenLoop) -> FollowUpType {
        TimeGate::new(&self.config.loops).follow_up_type(l, self.clock.now())
    }

    /// Boost every open loop matching any mentioned topic. Returns how many loops rose.
    pub fn boost_salience(&self, user_id: &str, mentioned_topics: &[String]) -> usize {
        let mentioned: Vec<String> = mentioned_topics
            .iter()
            .map(|t| normalize_topic(t))
            .filter(|t| !t.is_empty())
            .collect();
        if mentioned.is_empty() {
            return 0;
        }
        self.try_boost(user_id, &mentioned)
            .inspect_err(|error| warn!(%error, user_id, "salience boost failed"))
            .unwrap_or(0)
    }

    fn try_boost(&self, user_id: &str, mentioned: &[String]) -> Result<usize> {
        let now = self.clock.now();
        let engine = SalienceEngine::new(&self.config.loops);
        let mut boosted = 0;
        for l in self.store.loops_for_user(user_id, &LoopStatus::OPEN)? {
            let n = engine.count_matches(&l.topic, mentioned, &self.matcher);
            if n == 0 {
                continue;
            }
            if self.store.add_loop_salience(l.id, engine.boost_amount(n), now)? {
                debug!(id = %l.id, topic = %l.topic, matches = n, "salience boosted");
                boosted += 1;
            }
        }
        Ok(boosted)
    }

    /// Dismiss every open loop whose premise the user contradicted.
    pub fn dismiss_by_topic(&self, user_id: &str, topic: &str) -> usize {
        let key = normalize_topic(topic);
        if key.is_empty() {
            return 0;
        }
        self.try_dismiss(user_id, &key)
            .inspect_err(|error| warn!(%error, user_id, topic, "dismiss failed"))
            .unwrap_or(0)
    }

    fn try_dismiss(&self, user_id: &str, key: &str) -> Result<usize> {
        let ids: Vec<Uuid> = self
            .store
            .loops_for_user(user_id, &LoopStatus::OPEN)?
            .into_iter()
            .filter(|l| self.matcher.matches(&l.topic, key))
            .map(|l| l.id)
            .collect();
        self.store
            .set_loop_status(&ids, &LoopStatus::OPEN, LoopStatus::Dismissed, self.clock.now())
    }

    /// Count one surfacing. `false` once the loop is closed or exhausted.
    pub fn mark_surfaced(&self, id: Uuid) -> bool {
        self.store
            .mark_loop_surfaced(id, self.clock.now())
            .inspect_err(|error| warn!(%error, %id, "mark surfaced failed"))
            .unwrap_or(false)
    }

    pub fn resolve(&self, id: Uuid) -> bool {
        self.store
            .set_loop_status(&[id], &LoopStatus::OPEN, LoopStatus::Resolved, self.clock.now())
            .inspect_err(|error| warn!(%error, %id, "resolve failed"))
            .map(|n| n == 1)
            .unwrap_or(false)
    }

    /// Fade salience on loops the user has not mentioned for a while.
    pub fn decay_salience(&self, user_id: &str) -> usize {
        self.try_decay(user_id)
            .inspect_err(|error| warn!(%error, user_id, "loop decay failed"))
            .unwrap_or(0)
    }

    fn try_decay(&self, user_id: &str) -> Result<usize> {
        let now = self.clock.now();
        let scheduler = DecayScheduler::new(&self.config.decay);
        let mut applied = 0;
        for l in self.store.loops_for_user(user_id, &LoopStatus::OPEN)? {
            if let Some(decay) = scheduler.decay_loop(&l, now)
                && self.store.apply_loop_decay(&decay, now)?
            {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Physically delete terminal loops past the retention window.
    pub fn cleanup(&self) -> usize {
        let retention = self.config.sweep.terminal_retention_days * SECS_PER_DAY;
        self.store
            .delete_terminal_loops(self.clock.now() - retention)
            .inspect_err(|error| warn!(%error, "loop cleanup failed"))
            .unwrap_or(0)
    }

    pub fn list(&self, user_id: &str, statuses: &[LoopStatus]) -> Vec<OpenLoop> {
        self.store
            .loops_for_user(user_id, statuses)
            .inspect_err(|error| warn!(%error, user_id, "loop list failed"))
            .unwrap_or_default()
    }
}
