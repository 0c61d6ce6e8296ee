//! Per-user identity model (spec.md §4.7). Structurally identical to the
//! anomaly baseline (§4.6) — same half-space-trees scorer/learner — but
//! persisted separately, under `keyboard_identity`, and its risk is only
//! trusted once enough of *this user's* windows have been folded in.

use crate::models::hst::HstModel;

pub struct IdentityOutcome {
    pub identity_risk: f64,
    pub identity_confidence: f64,
}

/// confidence = min(1, feature_window_count / samples_required) (spec.md
/// §4.7). `feature_window_count` is tracked on the persisted `UserModel`
/// row, not inside the scorer itself, since it must survive independent of
/// model internals (and is what the store's auto-heal path resets to zero).
pub fn identity_confidence(feature_window_count: u32, samples_required: u32) -> f64 {
    (feature_window_count as f64 / samples_required.max(1) as f64).min(1.0)
}

pub fn evaluate(
    model: Option<&HstModel>,
    recent_windows: &[crate::model::window::FeatureWindow],
    feature_window_count: u32,
    samples_required: u32,
) -> IdentityOutcome {
    let identity_confidence = identity_confidence(feature_window_count, samples_required);
    let identity_risk = match model {
        Some(model) if !recent_windows.is_empty() => {
            let sum: f64 = recent_windows.iter().map(|w| model.score_one(w)).sum();
            sum / recent_windows.len() as f64
        }
        _ => 0.0,
    };
    IdentityOutcome {
        identity_risk,
        identity_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_caps_at_one() {
        assert_eq!(identity_confidence(0, 150), 0.0);
        assert_eq!(identity_confidence(75, 150), 0.5);
        assert_eq!(identity_confidence(150, 150), 1.0);
        assert_eq!(identity_confidence(300, 150), 1.0);
    }

    #[test]
    fn cold_start_identity_is_zero_risk() {
        let out = evaluate(None, &[], 0, 150);
        assert_eq!(out.identity_risk, 0.0);
        assert_eq!(out.identity_confidence, 0.0);
    }
}
