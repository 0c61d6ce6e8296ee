//! Small shared helpers: clamping, id generation, basic statistics.

/// Clamp into `[lo, hi]`, tolerant of NaN by treating it as `lo`.
pub fn clamp01(v: f64) -> f64 {
    clamp(v, 0.0, 1.0)
}

pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        return lo;
    }
    v.max(lo).min(hi)
}

pub fn new_eval_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Mean/std/min/max over a finite slice. Returns `None` if the slice is
/// empty or contains a non-finite value (callers treat that as a
/// discarded window, per spec.md §4.1).
pub fn summary_stats(values: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !mean.is_finite() || !std.is_finite() {
        return None;
    }
    Some((mean, std, min, max))
}
