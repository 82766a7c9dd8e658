//! End-to-end behaviour of the pure engine: loops through selection and
//! routing, relationship events through rupture and decay.

use presence_core::time::{SECS_PER_DAY, SECS_PER_HOUR, SECS_PER_MINUTE};
use presence_core::{
    ActionType, ClassifiedEvent, DecayScheduler, EngineConfig, FollowUpType, LoopKind,
    LoopOptions, LoopSelector, LoopStatus, OngoingThread, OpenLoop, PriorityRouter, RelationshipScorer,
    RelationshipState, RouteReason, SalienceEngine, Sentiment, TopicMatcher, TurnSignals, UserMood,
    normalize_topic,
};

fn make_loop(config: &EngineConfig, kind: LoopKind, topic: &str, opts: LoopOptions, now: i64) -> OpenLoop {
    let salience = SalienceEngine::new(&config.loops).initial(kind, opts.salience);
    OpenLoop::new("u1", kind, &normalize_topic(topic), salience, opts, now, &config.loops)
}

#[test]
fn test_near_duplicate_topics_collapse() {
    let config = EngineConfig::default();
    let matcher = TopicMatcher::new(config.loops.topic_match_threshold);
    let existing = normalize_topic("Holiday party");
    assert!(matcher.matches_raw(&existing, "holiday parties"));
    assert!(!matcher.matches_raw(&existing, "job interview"));
}

#[test]
fn test_pending_event_lifecycle() {
    let config = EngineConfig::default();
    let selector = LoopSelector::new(&config.loops);
    let event = 10 * SECS_PER_DAY;
    let l = make_loop(
        &config,
        LoopKind::PendingEvent,
        "Driving test",
        LoopOptions {
            event_datetime: Some(event),
            ..Default::default()
        },
        0,
    );
    let loops = [l];
    let buffer = config.loops.event_buffer_secs();

    let before = selector.select(&loops, event - SECS_PER_HOUR).unwrap();
    assert_eq!(before.follow_up_type, FollowUpType::Reminder);

    assert!(selector.select(&loops, event + buffer - SECS_PER_MINUTE).is_none());

    let after = selector.select(&loops, event + buffer + SECS_PER_MINUTE).unwrap();
    assert_eq!(after.follow_up_type, FollowUpType::Followup);
}

#[test]
fn test_boost_lets_fresh_loop_overtake_stale() {
    let config = EngineConfig::default();
    let salience = SalienceEngine::new(&config.loops);
    let matcher = TopicMatcher::new(config.loops.topic_match_threshold);
    let selector = LoopSelector::new(&config.loops);

    let stale = make_loop(
        &config,
        LoopKind::EmotionalFollowup,
        "sister wedding",
        LoopOptions {
            salience: Some(0.62),
            ..Default::default()
        },
        0,
    );
    let mut fresh = make_loop(&config, LoopKind::CommitmentCheck, "guitar practice", LoopOptions::default(), 0);
    let mentioned = vec![normalize_topic("guitar practice"), normalize_topic("Guitar practicing")];
    let n = salience.count_matches(&fresh.topic, &mentioned, &matcher);
    assert_eq!(n, 2);
    fresh.salience = salience.boosted(fresh.salience, n);

    let chosen = selector.select(&[stale, fresh.clone()], 60).unwrap();
    assert_eq!(chosen.open_loop.id, fresh.id);
}

#[test]
fn test_dismissed_loop_never_selected() {
    let config = EngineConfig::default();
    let selector = LoopSelector::new(&config.loops);
    let mut l = make_loop(&config, LoopKind::PendingEvent, "office party", LoopOptions::default(), 0);
    l.status = LoopStatus::Dismissed;
    for hour in 0..48 {
        assert!(selector.select(std::slice::from_ref(&l), hour * SECS_PER_HOUR).is_none());
    }
}

#[test]
fn test_router_precedence_over_thread() {
    let config = EngineConfig::default();
    let selector = LoopSelector::new(&config.loops);
    let router = PriorityRouter::new(&config.router);
    let now = 2 * SECS_PER_DAY;

    let l = make_loop(
        &config,
        LoopKind::EmotionalFollowup,
        "grandmother surgery",
        LoopOptions {
            salience: Some(0.85),
            ..Default::default()
        },
        0,
    );
    let threads = [OngoingThread::new("p1", "u1", "lighthouses", 0.95, true, 0)];
    let top_loop = selector.select(std::slice::from_ref(&l), now);
    let top_thread = router.select_thread(&threads, now);
    assert!(top_thread.is_some());

    let decision = router.route(top_loop.as_ref(), top_thread).unwrap();
    assert_eq!(decision.reason, RouteReason::HighPriorityLoop);
    assert_eq!(decision.id(), l.id);
}

#[test]
fn test_rupture_repair_then_decay() {
    let config = EngineConfig::default();
    let scorer = RelationshipScorer::new(&config.relationship, &config.rupture);
    let decay = DecayScheduler::new(&config.decay);
    let mut state = RelationshipState::new("u1", "p1", 0, &config.relationship);
    let mut history = Vec::new();

    let turns = [
        (Sentiment::Positive, UserMood::Happy, ActionType::Sharing),
        (Sentiment::Positive, UserMood::Calm, ActionType::Gratitude),
        (Sentiment::Hostile, UserMood::Angry, ActionType::Insult),
    ];
    for (i, (s, m, a)) in turns.into_iter().enumerate() {
        let e = ClassifiedEvent {
            sentiment_toward_persona: s,
            user_mood: m,
            action_type: a,
        };
        let out = scorer.apply_event(&state, &e, &history, i as i64 * SECS_PER_MINUTE);
        history.insert(0, out.record);
        state = out.state;
    }
    assert!(state.is_ruptured);

    let apology = ClassifiedEvent {
        sentiment_toward_persona: Sentiment::Positive,
        user_mood: UserMood::Sad,
        action_type: ActionType::Apology,
    };
    let out = scorer.apply_event(&state, &apology, &history, SECS_PER_HOUR);
    state = out.state;
    assert!(!state.is_ruptured);
    let trust_after_repair = state.dimensions.trust;
    assert!(trust_after_repair > 0.0);

    let mut prev = trust_after_repair;
    for day in 8..20 {
        if let Some(next) = decay.decay_relationship(&state, SECS_PER_HOUR + day * SECS_PER_DAY) {
            assert!(next.dimensions.trust <= prev);
            assert!(next.dimensions.trust >= config.decay.trust_floor);
            prev = next.dimensions.trust;
            state = next;
        }
    }
    assert!(state.dimensions.trust < trust_after_repair);
}

#[test]
fn test_turn_signals_drive_loop_creation() {
    let config = EngineConfig::default();
    let raw = serde_json::json!({
        "openLoopIntent": {
            "kind": "commitment_check",
            "topic": "Quit smoking",
            "triggerContext": "said they'd stop this week"
        },
        "classifiedEvent": {"sentimentTowardPersona": "grumpy"}
    });
    let (signals, dropped) = TurnSignals::parse_lenient(&raw);
    assert_eq!(dropped, ["classifiedEvent"]);
    let intent = signals.open_loop_intent.unwrap();
    let l = make_loop(&config, intent.kind, &intent.topic, intent.to_options(0), 0);
    assert_eq!(l.topic, "quit smok");
    assert_eq!(l.salience, config.loops.initial_salience.commitment_check);
}
