//! Physics detector (spec.md §4.3). Stateless, deterministic, tiered.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::extractors::mouse::StrokeSegment;
use crate::model::event::{MouseEvent, MouseEventKind};
use crate::util::clamp;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Tier 1: instantaneous velocity above this (px/ms) is not achievable
    /// by a human wrist/arm.
    pub max_velocity_px_ms: f64,
    /// Tier 1: a run of at least this many consecutive dead-straight
    /// segments is not human.
    pub linearity_run_len: usize,
    /// Curvature below this counts as "straight" for both tiers.
    pub straight_curvature_eps: f64,
    /// Tier 2: coefficient of variation of inter-event intervals below this
    /// indicates suspiciously regular timing.
    pub regular_timing_cv: f64,
    /// Tier 2: fraction of segments that are straight (without meeting the
    /// tier-1 run length) that still counts as suspicious.
    pub near_straight_fraction: f64,
    pub tier2_increment: f64,
    pub tier2_cap: f64,
    pub suspicion_threshold: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            max_velocity_px_ms: 10.0,
            linearity_run_len: 8,
            straight_curvature_eps: 1e-4,
            regular_timing_cv: 0.05,
            near_straight_fraction: 0.6,
            tier2_increment: 0.3,
            tier2_cap: 0.9,
            suspicion_threshold: 0.4,
        }
    }
}

/// spec.md §4.3: tier 1 returns 1.0 outright, tier 2 accumulates a bounded
/// score, tier 3 passes it through only if it clears the suspicion bar.
pub fn physics_score(events: &[MouseEvent], segments: &[StrokeSegment], cfg: &PhysicsConfig) -> f64 {
    if tier1_hard_fail(events, segments, cfg) {
        return 1.0;
    }

    let tier2 = tier2_additive(events, segments, cfg);
    if tier2 > cfg.suspicion_threshold {
        tier2
    } else {
        0.0
    }
}

fn tier1_hard_fail(events: &[MouseEvent], segments: &[StrokeSegment], cfg: &PhysicsConfig) -> bool {
    if segments.iter().any(|s| s.velocity > cfg.max_velocity_px_ms) {
        return true;
    }

    if longest_straight_run(segments, cfg) >= cfg.linearity_run_len {
        return true;
    }

    let moves: Vec<&MouseEvent> = events
        .iter()
        .filter(|e| e.kind == MouseEventKind::Move)
        .collect();
    for w in moves.windows(2) {
        let (a, b) = (w[0], w[1]);
        let moved = (a.x - b.x).abs() > f64::EPSILON || (a.y - b.y).abs() > f64::EPSILON;
        if moved && (b.t - a.t).abs() < f64::EPSILON {
            return true;
        }
    }

    false
}

fn tier2_additive(events: &[MouseEvent], segments: &[StrokeSegment], cfg: &PhysicsConfig) -> f64 {
    let mut score = 0.0;

    if let Some(cv) = interval_cv(events) {
        if cv < cfg.regular_timing_cv {
            score += cfg.tier2_increment;
        }
    }

    if !segments.is_empty() {
        let straight = segments
            .iter()
            .filter(|s| s.curvature.abs() < cfg.straight_curvature_eps)
            .count();
        if straight as f64 / segments.len() as f64 >= cfg.near_straight_fraction {
            score += cfg.tier2_increment;
        }
    }

    if has_repeating_offset(events) {
        score += cfg.tier2_increment;
    }

    clamp(score, 0.0, cfg.tier2_cap)
}

fn longest_straight_run(segments: &[StrokeSegment], cfg: &PhysicsConfig) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for s in segments {
        if s.curvature.abs() < cfg.straight_curvature_eps {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn interval_cv(events: &[MouseEvent]) -> Option<f64> {
    let moves: Vec<&MouseEvent> = events
        .iter()
        .filter(|e| e.kind == MouseEventKind::Move)
        .collect();
    if moves.len() < 3 {
        return None;
    }
    let intervals: Vec<f64> = moves.windows(2).map(|w| w[1].t - w[0].t).collect();
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    if mean <= f64::EPSILON {
        return None;
    }
    let variance = intervals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() / mean)
}

/// Bot scripts frequently replay the same relative offset between MOVEs.
fn has_repeating_offset(events: &[MouseEvent]) -> bool {
    let moves: Vec<&MouseEvent> = events
        .iter()
        .filter(|e| e.kind == MouseEventKind::Move)
        .collect();
    if moves.len() < 4 {
        return false;
    }
    let mut counts: HashMap<(i64, i64), u32> = HashMap::new();
    for w in moves.windows(2) {
        let dx = ((w[1].x - w[0].x) * 100.0).round() as i64;
        let dy = ((w[1].y - w[0].y) * 100.0).round() as i64;
        if dx == 0 && dy == 0 {
            continue;
        }
        *counts.entry((dx, dy)).or_insert(0) += 1;
    }
    counts.values().any(|&c| c as f64 >= moves.len() as f64 * 0.5)
}
