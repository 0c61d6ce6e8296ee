//! Keyboard feature extractor (spec.md §4.1).
//!
//! Turns a DOWN/UP event stream into 12-dim `FeatureWindow`s over a
//! 50-keystroke sliding window, step 5. The partial window state
//! (`KeyboardBuilder`) round-trips through `SessionState` since this engine
//! has no per-process buffer between requests (spec.md §2).

use std::collections::VecDeque;

use crate::clock::Millis;
use crate::config::KeyboardWindowConfig;
use crate::model::event::{KeyEvent, KeyEventKind};
use crate::model::session::{KeyboardBuilder, SessionState};
use crate::model::window::FeatureWindow;
use crate::util::summary_stats;

#[derive(Debug, Clone, Copy)]
struct KeystrokeSample {
    dwell: f64,
    flight: Option<f64>,
    interval: Option<f64>,
}

/// Processes a batch of keyboard events against the session's in-flight
/// builder, returning any windows that completed as a result (in emission
/// order, oldest first). The caller is responsible for pushing them onto
/// `session.completed_windows` (done here for convenience) and for
/// persisting the mutated `SessionState`.
pub fn ingest_keyboard_events(
    session: &mut SessionState,
    events: &[KeyEvent],
    cfg: &KeyboardWindowConfig,
    now_ms: Millis,
) -> Vec<FeatureWindow> {
    if session.first_kb_event_time.is_none() && !events.is_empty() {
        session.first_kb_event_time = Some(now_ms);
    }

    let mut samples = builder_samples(&session.kb_builder);
    let mut emitted = Vec::new();

    for ev in events {
        match ev.kind {
            KeyEventKind::Down => {
                let flight_at_down = session.kb_builder.last_up_at.map(|up| ev.t - up);
                let interval_at_down = session.kb_builder.last_down_at.map(|prev| ev.t - prev);
                session.kb_builder.last_down_at = Some(ev.t);
                session
                    .kb_builder
                    .pressed
                    .push_back((ev.key.clone(), ev.t, interval_at_down, flight_at_down));
            }
            KeyEventKind::Up => {
                let pos = session
                    .kb_builder
                    .pressed
                    .iter()
                    .rposition(|(key, _, _, _)| key == &ev.key);
                let Some(pos) = pos else { continue };
                let (_, down_t, interval_at_down, flight_at_down) =
                    session.kb_builder.pressed.remove(pos).unwrap();
                session.kb_builder.last_up_at = Some(ev.t);

                let dwell = ev.t - down_t;
                samples.push_back(KeystrokeSample {
                    dwell,
                    flight: flight_at_down,
                    interval: interval_at_down,
                });
                if samples.len() as u32 > cfg.window_size {
                    samples.pop_front();
                }

                session.kb_builder.total_keystrokes += 1;
                session.kb_builder.keystrokes_since_emit += 1;

                let should_emit = samples.len() as u32 == cfg.window_size
                    && (session.kb_builder.total_keystrokes == cfg.window_size
                        || session.kb_builder.keystrokes_since_emit >= cfg.window_step);

                if should_emit {
                    session.kb_builder.keystrokes_since_emit = 0;
                    if let Some(window) = build_window(&samples) {
                        emitted.push(window);
                    }
                }
            }
        }
    }

    store_builder_samples(&mut session.kb_builder, samples);

    if !emitted.is_empty() {
        session.kb_window_count += emitted.len() as u32;
        for w in &emitted {
            session.completed_windows.push_front(*w);
        }
        while session.completed_windows.len() > cfg.completed_windows_capacity {
            session.completed_windows.pop_back();
        }
    }

    emitted
}

fn build_window(samples: &VecDeque<KeystrokeSample>) -> Option<FeatureWindow> {
    let dwell: Vec<f64> = samples.iter().map(|s| s.dwell).collect();
    let flight: Vec<f64> = samples.iter().filter_map(|s| s.flight).collect();
    let interval: Vec<f64> = samples.iter().filter_map(|s| s.interval).collect();

    let (dwell_mean, dwell_std, dwell_min, dwell_max) = summary_stats(&dwell)?;
    let (flight_mean, flight_std, flight_min, flight_max) = summary_stats(&flight)?;
    let (interval_mean, interval_std, interval_min, interval_max) = summary_stats(&interval)?;

    let window = FeatureWindow {
        dwell_mean,
        dwell_std,
        dwell_min,
        dwell_max,
        flight_mean,
        flight_std,
        flight_min,
        flight_max,
        interval_mean,
        interval_std,
        interval_min,
        interval_max,
    };
    window.is_finite().then_some(window)
}

/// `KeyboardBuilder` stores completed-sample state as parallel deques so it
/// stays cleanly `Serialize`; reassemble into the richer in-memory shape
/// while processing, then flatten back before returning.
fn builder_samples(builder: &KeyboardBuilder) -> VecDeque<KeystrokeSample> {
    builder
        .dwell_samples
        .iter()
        .zip(builder.flight_samples.iter())
        .zip(builder.interval_samples.iter())
        .map(|((&dwell, &flight), &interval)| KeystrokeSample {
            dwell,
            flight,
            interval,
        })
        .collect()
}

fn store_builder_samples(builder: &mut KeyboardBuilder, samples: VecDeque<KeystrokeSample>) {
    builder.dwell_samples = samples.iter().map(|s| s.dwell).collect();
    builder.flight_samples = samples.iter().map(|s| s.flight).collect();
    builder.interval_samples = samples.iter().map(|s| s.interval).collect();
}

pub fn count_confidence(session: &SessionState, cfg: &KeyboardWindowConfig) -> f64 {
    (session.kb_window_count as f64 / cfg.count_maturity as f64).min(1.0)
}

pub fn time_confidence(session: &SessionState, cfg: &KeyboardWindowConfig, now_ms: Millis) -> f64 {
    match session.first_kb_event_time {
        Some(first) => {
            let elapsed_s = (now_ms - first).max(0) as f64 / 1000.0;
            (elapsed_s / cfg.time_maturity_secs).min(1.0)
        }
        None => 0.0,
    }
}

/// Cold-start maturity (spec.md §4.1): geometric mean of count- and
/// time-based confidence, zero until both contribute.
pub fn kb_confidence(session: &SessionState, cfg: &KeyboardWindowConfig, now_ms: Millis) -> f64 {
    (count_confidence(session, cfg) * time_confidence(session, cfg, now_ms)).sqrt()
}
