//! Weighted-sum fusion and the threshold/override decision machinery
//! (spec.md §4.10 steps 3-6).

use serde::{Deserialize, Serialize};

use crate::config::{FusionWeights, SignalWeight, ThresholdConfig};
use crate::detectors::navigator::NavDecision;
use crate::model::session::{Mode, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Challenge,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Challenge => "CHALLENGE",
            Decision::Block => "BLOCK",
        }
    }
}

/// The five signals fusion reads (spec.md §4.10 step 3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ComponentScores {
    pub kb_score: f64,
    pub mouse_score: f64,
    pub nav_score: f64,
    pub identity_risk: f64,
    pub identity_confidence: f64,
}

fn weight_for_mode(sw: SignalWeight, mode: Mode) -> f64 {
    match mode {
        Mode::Normal => sw.normal,
        Mode::Challenge => sw.challenge,
        Mode::Trusted => sw.normal * sw.trusted_factor,
    }
}

/// `final_risk = clamp(Σ wᵢ·rᵢ, 0, 1)`, identity further scaled by
/// `√identity_confidence` (spec.md §4.10 step 5).
pub fn final_risk(scores: &ComponentScores, mode: Mode, weights: &FusionWeights) -> f64 {
    let kb_w = weight_for_mode(weights.keyboard, mode);
    let mouse_w = weight_for_mode(weights.mouse, mode);
    let nav_w = weight_for_mode(weights.navigator, mode);
    let id_w = weight_for_mode(weights.identity, mode);

    let identity_contribution = scores.identity_risk * scores.identity_confidence.sqrt();

    let sum = kb_w * scores.kb_score + mouse_w * scores.mouse_score + nav_w * scores.nav_score + id_w * identity_contribution;
    crate::util::clamp01(sum)
}

/// First-match-wins override chain (spec.md §4.10 step 4). Checked ahead of
/// fusion; when one fires, `final_risk` is still computed for the audit
/// record but the override's decision/reason wins.
pub fn priority_override(
    session: &SessionState,
    scores: &ComponentScores,
    nav_decision: NavDecision,
    strike_limit: u32,
    hst_count_maturity: u32,
) -> Option<(Decision, &'static str)> {
    if session.strike_count >= strike_limit {
        return Some((Decision::Block, "strike_limit"));
    }
    if scores.mouse_score >= 1.0 {
        return Some((Decision::Block, "non_human_physics"));
    }
    if nav_decision == NavDecision::Block {
        return Some((Decision::Block, "environment_violation"));
    }
    if scores.identity_risk >= 0.95 && scores.identity_confidence >= 0.6 {
        return Some((Decision::Block, "identity_contradiction"));
    }
    if scores.identity_risk >= 0.98 && scores.identity_confidence < 0.6 {
        return Some((Decision::Challenge, "immature_identity"));
    }
    if session.kb_window_count < hst_count_maturity {
        return Some((Decision::Challenge, "hst_cold_start"));
    }
    None
}

/// Mode-relative ALLOW/CHALLENGE/BLOCK thresholding (spec.md §4.10 step 6).
pub fn threshold_decision(final_risk: f64, mode: Mode, thresholds: &ThresholdConfig) -> Decision {
    let t = match mode {
        Mode::Normal => thresholds.normal,
        Mode::Challenge => thresholds.challenge,
        Mode::Trusted => thresholds.trusted,
    };
    if final_risk >= t.block_at {
        Decision::Block
    } else if final_risk >= t.challenge_at {
        Decision::Challenge
    } else {
        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_risk_stays_in_unit_interval() {
        let weights = FusionWeights::default();
        let scores = ComponentScores {
            kb_score: 1.0,
            mouse_score: 1.0,
            nav_score: 1.0,
            identity_risk: 1.0,
            identity_confidence: 1.0,
        };
        let risk = final_risk(&scores, Mode::Normal, &weights);
        assert!((0.0..=1.0).contains(&risk));
    }

    #[test]
    fn identity_contribution_scales_by_sqrt_confidence() {
        let weights = FusionWeights::default();
        let mut scores = ComponentScores::default();
        scores.identity_risk = 1.0;
        scores.identity_confidence = 0.25;
        let risk = final_risk(&scores, Mode::Normal, &weights);
        // identity weight (0.65) * risk(1.0) * sqrt(0.25)=0.5 = 0.325
        assert!((risk - 0.325).abs() < 1e-9);
    }

    #[test]
    fn trusted_mode_scales_keyboard_and_identity_but_not_mouse_or_nav() {
        let weights = FusionWeights::default();
        let mut scores = ComponentScores::default();
        scores.kb_score = 1.0;
        scores.mouse_score = 1.0;
        scores.nav_score = 1.0;
        let normal = final_risk(&scores, Mode::Normal, &weights);
        let trusted = final_risk(&scores, Mode::Trusted, &weights);
        assert!(trusted < normal, "trusted keyboard weight should be scaled down");
    }

    #[test]
    fn strike_limit_override_beats_everything_else() {
        let mut session = SessionState::new("s", "u", 0);
        session.strike_count = 3;
        let scores = ComponentScores::default();
        let over = priority_override(&session, &scores, NavDecision::Ok, 3, 50);
        assert_eq!(over, Some((Decision::Block, "strike_limit")));
    }

    #[test]
    fn hst_cold_start_overrides_to_challenge() {
        let session = SessionState::new("s", "u", 0);
        let scores = ComponentScores::default();
        let over = priority_override(&session, &scores, NavDecision::Ok, 3, 50);
        assert_eq!(over, Some((Decision::Challenge, "hst_cold_start")));
    }

    #[test]
    fn no_override_once_seasoned_and_clean() {
        let mut session = SessionState::new("s", "u", 0);
        session.kb_window_count = 50;
        let scores = ComponentScores::default();
        assert_eq!(priority_override(&session, &scores, NavDecision::Ok, 3, 50), None);
    }

    #[test]
    fn threshold_decision_respects_mode_table() {
        let thresholds = ThresholdConfig::default();
        assert_eq!(threshold_decision(0.3, Mode::Normal, &thresholds), Decision::Allow);
        assert_eq!(threshold_decision(0.6, Mode::Normal, &thresholds), Decision::Challenge);
        assert_eq!(threshold_decision(0.9, Mode::Normal, &thresholds), Decision::Block);
        assert_eq!(threshold_decision(0.5, Mode::Challenge, &thresholds), Decision::Challenge);
        assert_eq!(threshold_decision(0.59, Mode::Trusted, &thresholds), Decision::Allow);
    }
}
