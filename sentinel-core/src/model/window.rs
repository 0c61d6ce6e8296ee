//! Keyboard feature window (spec.md §3 "FeatureWindow", §4.1).

use serde::{Deserialize, Serialize};

/// 12-dim statistical vector: mean/std/min/max of dwell, flight, and
/// inter-key interval, over a 50-keystroke window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWindow {
    pub dwell_mean: f64,
    pub dwell_std: f64,
    pub dwell_min: f64,
    pub dwell_max: f64,
    pub flight_mean: f64,
    pub flight_std: f64,
    pub flight_min: f64,
    pub flight_max: f64,
    pub interval_mean: f64,
    pub interval_std: f64,
    pub interval_min: f64,
    pub interval_max: f64,
}

impl FeatureWindow {
    /// Flatten to the 12-dim vector the online models train on.
    pub fn as_vector(&self) -> [f64; 12] {
        [
            self.dwell_mean,
            self.dwell_std,
            self.dwell_min,
            self.dwell_max,
            self.flight_mean,
            self.flight_std,
            self.flight_min,
            self.flight_max,
            self.interval_mean,
            self.interval_std,
            self.interval_min,
            self.interval_max,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.as_vector().iter().all(|v| v.is_finite())
    }
}
