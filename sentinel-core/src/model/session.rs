//! Hot-state session record (spec.md §3 "SessionState").

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::window::FeatureWindow;
use crate::clock::Millis;

pub const SESSION_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Normal,
    Challenge,
    Trusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Unknown,
    Verifying,
    Trusted,
}

/// First-observed request context, pinned on the session's first
/// `evaluate` (spec.md §4.5, TOFU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TofuContext {
    pub ua_class: String,
    pub device_id: String,
    pub ip_geo_country: String,
}

/// Pending (not-yet-emitted) keystroke timing accumulator. Lives inside
/// `SessionState` because the engine is a stateless compute layer over the
/// hot store (spec.md §2): there is no in-process buffer surviving between
/// requests, so the partial window has to round-trip through hot state too.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyboardBuilder {
    /// Keys currently down, in press order:
    /// `(key, pressed_at_ms, interval_at_press, flight_at_press)`, where the
    /// last two are computed once at DOWN time (relative to the previous
    /// DOWN / UP respectively) and carried until the matching UP completes
    /// the sample.
    pub pressed: VecDeque<(String, f64, Option<f64>, Option<f64>)>,
    /// dwell/flight/interval samples accumulated since the last emitted
    /// window, oldest first.
    pub dwell_samples: VecDeque<f64>,
    pub flight_samples: VecDeque<Option<f64>>,
    pub interval_samples: VecDeque<Option<f64>>,
    /// Timestamp of the most recent UP event, to compute flight on the next
    /// DOWN, and the most recent DOWN, to compute inter-key interval.
    pub last_up_at: Option<f64>,
    pub last_down_at: Option<f64>,
    /// Keystrokes observed since the last window emission; a window fires
    /// once this reaches the configured window size, then slides by step.
    pub keystrokes_since_emit: u32,
    /// Total keystrokes ever observed by this session, used for the
    /// step-5 sliding behavior once primed.
    pub total_keystrokes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub user_id: String,

    pub trust_score: f64,
    pub mode: Mode,
    pub phase: Phase,

    pub last_kb_batch_id: i64,
    pub last_mouse_batch_id: i64,

    pub kb_builder: KeyboardBuilder,
    /// Most recent first, bounded (see config `completed_windows_capacity`).
    pub completed_windows: VecDeque<FeatureWindow>,
    pub kb_window_count: u32,
    pub first_kb_event_time: Option<Millis>,

    pub last_kb_score: f64,
    pub last_mouse_score: f64,
    pub last_nav_score: f64,
    pub last_identity_score: f64,
    pub last_identity_confidence: f64,

    pub consecutive_allows: u32,
    pub strike_count: u32,
    /// Fractional strikes accumulated from batch-gap resets (spec.md §4.10:
    /// "strike += 0.5, rounded at persist"), not yet folded into
    /// `strike_count`. Always in `[0.0, 1.0)`.
    pub gap_strike_accum: f64,
    pub learning_suspended_until: Option<Millis>,
    pub context_stable_since: Option<Millis>,
    pub tofu_context: Option<TofuContext>,

    pub move_count_since_last_click: u32,
    pub teleport_clicks: u32,
    pub total_clicks: u32,

    pub last_activity: Millis,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, now_ms: Millis) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            trust_score: 0.5,
            mode: Mode::Normal,
            phase: Phase::Unknown,
            last_kb_batch_id: 0,
            last_mouse_batch_id: 0,
            kb_builder: KeyboardBuilder::default(),
            completed_windows: VecDeque::new(),
            kb_window_count: 0,
            first_kb_event_time: None,
            last_kb_score: 0.0,
            last_mouse_score: 0.0,
            last_nav_score: 0.0,
            last_identity_score: 0.0,
            last_identity_confidence: 0.0,
            consecutive_allows: 0,
            strike_count: 0,
            gap_strike_accum: 0.0,
            learning_suspended_until: None,
            context_stable_since: None,
            tofu_context: None,
            move_count_since_last_click: 0,
            teleport_clicks: 0,
            total_clicks: 0,
            last_activity: now_ms,
        }
    }

    pub fn is_expired(&self, now_ms: Millis) -> bool {
        now_ms.saturating_sub(self.last_activity) > (SESSION_TTL_SECS as i64) * 1000
    }

    /// Gap reset (spec.md §4.10 "ingest_keyboard/ingest_mouse", edge case
    /// "Gap reset"): clears accumulated windows and the in-flight builder,
    /// the session's keyboard maturity counters, but not trust/mode/bans.
    pub fn reset_keyboard_windows(&mut self) {
        self.kb_builder = KeyboardBuilder::default();
        self.completed_windows.clear();
        self.kb_window_count = 0;
        self.first_kb_event_time = None;
    }

    /// Cold-start learning clear (spec.md §4.10 step 10): after a cold-start
    /// HST learning pass, force the next evaluate to re-collect windows
    /// rather than re-scoring the same ones. Unlike `reset_keyboard_windows`,
    /// this leaves `kb_window_count`/`first_kb_event_time` untouched so the
    /// maturity counter keeps accumulating toward `count_maturity`.
    pub fn clear_completed_windows(&mut self) {
        self.kb_builder = KeyboardBuilder::default();
        self.completed_windows.clear();
    }

    pub fn teleport_ratio(&self) -> f64 {
        self.teleport_clicks as f64 / (self.total_clicks.max(1) as f64)
    }

    /// Batch-gap half-strike (spec.md §4.10: "strike += 0.5, rounded at
    /// persist"). Folds whole strikes out of the fractional accumulator as
    /// soon as it reaches 1.0, so two gaps land exactly one strike rather
    /// than two.
    pub fn add_gap_strike(&mut self) {
        self.gap_strike_accum += 0.5;
        if self.gap_strike_accum >= 1.0 {
            self.gap_strike_accum -= 1.0;
            self.strike_count += 1;
        }
    }
}
