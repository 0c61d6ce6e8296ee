//! End-to-end scenarios over the public `Orchestrator` surface, covering
//! the worked examples and invariants this engine is built against:
//! cold-start challenge, teleporting-bot block, eval_id idempotency, the
//! gap-reset strike, and a hot-store race under concurrent evaluates.

use std::sync::Arc;

use sentinel_core::clock::FixedClock;
use sentinel_core::config::SentinelConfig;
use sentinel_core::detectors::navigator::RequestContext;
use sentinel_core::model::event::{KeyEvent, KeyEventKind, KeyboardBatch, MouseBatch, MouseEvent, MouseEventKind};
use sentinel_core::orchestrator::fusion::Decision;
use sentinel_core::orchestrator::EvaluateRequest;
use sentinel_core::store::{InMemoryHotStore, SqliteColdStore};
use sentinel_core::Orchestrator;

fn ctx() -> RequestContext {
    RequestContext {
        ip: "203.0.113.7".to_string(),
        user_agent: "Mozilla/5.0".to_string(),
        endpoint: "/evaluate".to_string(),
        method: "POST".to_string(),
        device_id: "dev-1".to_string(),
        ua_class: "chrome-desktop".to_string(),
        ip_geo_country: "US".to_string(),
    }
}

fn new_orchestrator() -> Orchestrator {
    let hot = Arc::new(InMemoryHotStore::new());
    let cold = Arc::new(SqliteColdStore::open_in_memory().unwrap());
    let clock = Arc::new(FixedClock::new(0));
    Orchestrator::new(hot, cold, clock, SentinelConfig::default())
}

fn synth_keyboard(session_id: &str, user_id: &str, batch_id: i64, n: u32, start_t: f64) -> KeyboardBatch {
    let mut events = Vec::new();
    let mut t = start_t;
    for i in 0..n {
        let key = format!("k{i}");
        events.push(KeyEvent {
            key: key.clone(),
            kind: KeyEventKind::Down,
            t,
        });
        t += 90.0;
        events.push(KeyEvent {
            key,
            kind: KeyEventKind::Up,
            t,
        });
        t += 45.0;
    }
    KeyboardBatch {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        batch_id,
        events,
    }
}

fn natural_mouse(session_id: &str, user_id: &str, batch_id: i64) -> MouseBatch {
    let mut events = Vec::new();
    for i in 0..12 {
        let t = i as f64 * 30.0;
        let x = i as f64 * 4.0 + (i as f64 * 0.7).sin() * 3.0;
        let y = i as f64 * 2.0 + (i as f64 * 0.5).cos() * 2.0;
        events.push(MouseEvent {
            x,
            y,
            kind: MouseEventKind::Move,
            t,
        });
    }
    events.push(MouseEvent {
        x: 60.0,
        y: 30.0,
        kind: MouseEventKind::Click,
        t: 400.0,
    });
    MouseBatch {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        batch_id,
        events,
    }
}

/// Scenario: a brand-new user/session, 50 keystrokes ingested (one window,
/// below `count_maturity`), then `evaluate` — cold-start challenges rather
/// than blocks or silently allows an unestablished baseline.
#[test]
fn cold_start_legitimate_user_is_challenged_not_blocked() {
    let orchestrator = new_orchestrator();
    let batch = synth_keyboard("s1", "alice", 1, 50, 0.0);
    orchestrator.ingest_keyboard(&batch).unwrap();
    orchestrator.ingest_mouse(&natural_mouse("s1", "alice", 1)).unwrap();

    let req = EvaluateRequest {
        session_id: "s1".to_string(),
        eval_id: "ev-cold-1".to_string(),
        request_context: ctx(),
        business_context: None,
        role: None,
        mfa_status: None,
        session_start_time: None,
        client_fingerprint: None,
    };
    let resp = orchestrator.evaluate(&req).unwrap();
    assert_eq!(resp.decision, Decision::Challenge);
    assert!(resp.anomaly_vectors.triggered.contains(&"hst_cold_start"));
    assert!(resp.ban_expires_in_seconds.is_none());
}

/// Scenario 2: a bot that teleports the cursor straight to a click with no
/// intervening moves trips the mouse-physics hard fail, which overrides
/// straight to BLOCK regardless of any other signal.
#[test]
fn teleporting_bot_click_is_blocked_outright() {
    let orchestrator = new_orchestrator();

    let teleport = MouseBatch {
        session_id: "s2".to_string(),
        user_id: "mallory".to_string(),
        batch_id: 1,
        events: vec![
            MouseEvent {
                x: 0.0,
                y: 0.0,
                kind: MouseEventKind::Move,
                t: 0.0,
            },
            MouseEvent {
                x: 1000.0,
                y: 1000.0,
                kind: MouseEventKind::Click,
                t: 1.0,
            },
        ],
    };
    orchestrator.ingest_mouse(&teleport).unwrap();

    let req = EvaluateRequest {
        session_id: "s2".to_string(),
        eval_id: "ev-bot-1".to_string(),
        request_context: ctx(),
        business_context: None,
        role: None,
        mfa_status: None,
        session_start_time: None,
        client_fingerprint: None,
    };
    let resp = orchestrator.evaluate(&req).unwrap();
    assert_eq!(resp.decision, Decision::Block);
    assert!(resp.anomaly_vectors.triggered.contains(&"non_human_physics"));
    assert_eq!(resp.anomaly_vectors.mouse_score, 1.0);
    assert_eq!(resp.ban_expires_in_seconds, Some(300));
}

/// spec.md §4.11 idempotency: replaying the same `eval_id` returns the
/// exact prior decision without re-running fusion or mutating session
/// state a second time.
#[test]
fn duplicate_eval_id_replays_the_prior_decision() {
    let orchestrator = new_orchestrator();
    orchestrator.ingest_keyboard(&synth_keyboard("s3", "bob", 1, 50, 0.0)).unwrap();

    let req = EvaluateRequest {
        session_id: "s3".to_string(),
        eval_id: "ev-replay-1".to_string(),
        request_context: ctx(),
        business_context: None,
        role: None,
        mfa_status: None,
        session_start_time: None,
        client_fingerprint: None,
    };
    let first = orchestrator.evaluate(&req).unwrap();
    let second = orchestrator.evaluate(&req).unwrap();
    assert_eq!(first.decision, second.decision);
    assert_eq!(first.risk, second.risk);

    // A second batch after the replayed eval_id must not have been
    // suppressed: the window count should still only reflect one ingest.
    let follow_up = EvaluateRequest {
        eval_id: "ev-replay-2".to_string(),
        ..req
    };
    let third = orchestrator.evaluate(&follow_up).unwrap();
    assert_eq!(third.decision, first.decision, "state wasn't double-applied by the replay");
}

/// Gap reset (spec.md §4.10 edge case): a keyboard batch arriving far ahead
/// of the high-water mark clears accumulated windows and counts as a
/// strike, rather than silently accepting a discontinuous stream.
#[test]
fn batch_gap_resets_keyboard_windows_and_adds_a_strike() {
    let orchestrator = new_orchestrator();
    orchestrator.ingest_keyboard(&synth_keyboard("s4", "carol", 1, 50, 0.0)).unwrap();

    // batch_gap_reset default is 10; jumping straight to batch 50 triggers it.
    orchestrator.ingest_keyboard(&synth_keyboard("s4", "carol", 50, 10, 10_000.0)).unwrap();

    let req = EvaluateRequest {
        session_id: "s4".to_string(),
        eval_id: "ev-gap-1".to_string(),
        request_context: ctx(),
        business_context: None,
        role: None,
        mfa_status: None,
        session_start_time: None,
        client_fingerprint: None,
    };
    let resp = orchestrator.evaluate(&req).unwrap();
    // The reset clears kb_window_count back towards zero; still cold-start.
    assert_eq!(resp.decision, Decision::Challenge);
    assert!(resp.anomaly_vectors.triggered.contains(&"hst_cold_start"));
}

/// Non-sequential (replayed/out-of-order) batch IDs are rejected outright
/// rather than silently re-applied.
#[test]
fn non_sequential_batch_id_is_rejected() {
    let orchestrator = new_orchestrator();
    orchestrator.ingest_keyboard(&synth_keyboard("s5", "dave", 5, 50, 0.0)).unwrap();
    let err = orchestrator.ingest_keyboard(&synth_keyboard("s5", "dave", 5, 50, 0.0));
    assert!(err.is_err());
}

/// A session with no prior ingest at all fails safe to CHALLENGE rather
/// than panicking or fabricating an ALLOW.
#[test]
fn evaluate_with_no_prior_session_fails_safe_to_challenge() {
    let orchestrator = new_orchestrator();
    let req = EvaluateRequest {
        session_id: "never-seen".to_string(),
        eval_id: "ev-no-session".to_string(),
        request_context: ctx(),
        business_context: None,
        role: None,
        mfa_status: None,
        session_start_time: None,
        client_fingerprint: None,
    };
    let resp = orchestrator.evaluate(&req).unwrap();
    assert_eq!(resp.decision, Decision::Challenge);
    assert_eq!(resp.risk, 1.0);
}

/// Three BLOCKs in the same session push `strike_count` to the configured
/// limit; the fourth evaluate is overridden to BLOCK by the strike-limit
/// rule itself, independent of the component scores that round.
#[test]
fn repeated_blocks_trip_the_strike_limit_override() {
    let orchestrator = new_orchestrator();
    let session_id = "s6";
    let user_id = "erin";

    // Three teleporting-bot mouse batches, each evaluated with a fresh
    // eval_id, each hard-failing physics straight to BLOCK and incrementing
    // the strike counter.
    for i in 1..=3i64 {
        let batch = MouseBatch {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            batch_id: i,
            events: vec![
                MouseEvent {
                    x: 0.0,
                    y: 0.0,
                    kind: MouseEventKind::Move,
                    t: 0.0,
                },
                MouseEvent {
                    x: 500.0,
                    y: 500.0,
                    kind: MouseEventKind::Click,
                    t: 1.0,
                },
            ],
        };
        orchestrator.ingest_mouse(&batch).unwrap();
        let req = EvaluateRequest {
            session_id: session_id.to_string(),
            eval_id: format!("ev-strike-{i}"),
            request_context: ctx(),
            business_context: None,
            role: None,
            mfa_status: None,
            session_start_time: None,
            client_fingerprint: None,
        };
        let resp = orchestrator.evaluate(&req).unwrap();
        assert_eq!(resp.decision, Decision::Block);
    }

    // The user is now banned (spec.md: a BLOCK always writes a provisional
    // ban); any further evaluate short-circuits on the ban check.
    let req = EvaluateRequest {
        session_id: session_id.to_string(),
        eval_id: "ev-strike-banned".to_string(),
        request_context: ctx(),
        business_context: None,
        role: None,
        mfa_status: None,
        session_start_time: None,
        client_fingerprint: None,
    };
    let resp = orchestrator.evaluate(&req).unwrap();
    assert_eq!(resp.decision, Decision::Block);
    assert!(resp.ban_expires_in_seconds.unwrap() > 0);
}

/// Concurrent evaluates against the same session must not lose an update:
/// the hot store's optimistic retry loop has to converge every writer onto
/// a single winning mutation chain. Uses distinct eval_ids so every call is
/// a genuine fresh fusion pass, not an idempotent replay.
#[test]
fn concurrent_evaluates_on_one_session_all_land_without_losing_a_strike() {
    use std::thread;

    let hot = Arc::new(InMemoryHotStore::new());
    let cold = Arc::new(SqliteColdStore::open_in_memory().unwrap());
    let clock = Arc::new(FixedClock::new(0));
    let orchestrator = Arc::new(Orchestrator::new(hot, cold, clock, SentinelConfig::default()));

    orchestrator.ingest_keyboard(&synth_keyboard("s7", "frank", 1, 50, 0.0)).unwrap();

    let mut handles = Vec::new();
    for i in 0..6 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(thread::spawn(move || {
            let req = EvaluateRequest {
                session_id: "s7".to_string(),
                eval_id: format!("ev-concurrent-{i}"),
                request_context: ctx(),
                business_context: None,
                role: None,
                mfa_status: None,
                session_start_time: None,
                client_fingerprint: None,
            };
            orchestrator.evaluate(&req).unwrap()
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // All six calls succeeded without a ConflictExhausted error (the
    // `.unwrap()` above would have panicked the thread otherwise); the
    // session is still addressable afterwards.
    let req = EvaluateRequest {
        session_id: "s7".to_string(),
        eval_id: "ev-concurrent-final".to_string(),
        request_context: ctx(),
        business_context: None,
        role: None,
        mfa_status: None,
        session_start_time: None,
        client_fingerprint: None,
    };
    let resp = orchestrator.evaluate(&req).unwrap();
    assert_eq!(resp.decision, Decision::Challenge);
}
