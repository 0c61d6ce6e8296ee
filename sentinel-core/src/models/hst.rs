//! Online half-space-trees anomaly scorer (spec.md §4.6 "Anomaly model").
//!
//! A small, from-scratch HS-Trees ensemble: each tree recursively halves a
//! per-dimension working range to pick split points (no training pass
//! needed to choose splits, true to the original algorithm), and tracks a
//! running point-mass count at every node. `score_one` reads the mass
//! profile without mutating it; `learn_one` is the only mutator.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::model::window::FeatureWindow;
use crate::util::clamp01;

const FEATURE_DIMS: usize = 12;

/// Generous per-dimension working ranges in milliseconds, wide enough to
/// contain ordinary human typing timings; a point outside the range still
/// works, it just always routes to the outermost child.
const INITIAL_RANGES: [(f64, f64); FEATURE_DIMS] = [
    (0.0, 400.0),   // dwell_mean
    (0.0, 200.0),   // dwell_std
    (0.0, 400.0),   // dwell_min
    (0.0, 600.0),   // dwell_max
    (0.0, 800.0),   // flight_mean
    (0.0, 400.0),   // flight_std
    (0.0, 800.0),   // flight_min
    (0.0, 1200.0),  // flight_max
    (0.0, 1000.0),  // interval_mean
    (0.0, 500.0),   // interval_std
    (0.0, 1000.0),  // interval_min
    (0.0, 1500.0),  // interval_max
];

const DEFAULT_NUM_TREES: usize = 20;
const DEFAULT_MAX_DEPTH: u32 = 6;
pub const WARMUP_SAMPLES: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum HstNode {
    Leaf {
        mass: u64,
    },
    Internal {
        dim: usize,
        split: f64,
        mass: u64,
        left: Box<HstNode>,
        right: Box<HstNode>,
    },
}

impl HstNode {
    fn build(depth: u32, max_depth: u32, ranges: &[(f64, f64); FEATURE_DIMS], rng: &mut StdRng) -> Self {
        if depth >= max_depth {
            return HstNode::Leaf { mass: 0 };
        }
        let dim = rng.gen_range(0..FEATURE_DIMS);
        let (lo, hi) = ranges[dim];
        let split = (lo + hi) / 2.0;

        let mut left_ranges = *ranges;
        left_ranges[dim] = (lo, split);
        let mut right_ranges = *ranges;
        right_ranges[dim] = (split, hi);

        HstNode::Internal {
            dim,
            split,
            mass: 0,
            left: Box::new(HstNode::build(depth + 1, max_depth, &left_ranges, rng)),
            right: Box::new(HstNode::build(depth + 1, max_depth, &right_ranges, rng)),
        }
    }

    fn mass(&self) -> u64 {
        match self {
            HstNode::Leaf { mass } => *mass,
            HstNode::Internal { mass, .. } => *mass,
        }
    }

    /// Returns (mass at the reached leaf, depth reached).
    fn traverse(&self, x: &[f64; FEATURE_DIMS], depth: u32) -> (u64, u32) {
        match self {
            HstNode::Leaf { mass } => (*mass, depth),
            HstNode::Internal {
                dim,
                split,
                left,
                right,
                ..
            } => {
                if x[*dim] < *split {
                    left.traverse(x, depth + 1)
                } else {
                    right.traverse(x, depth + 1)
                }
            }
        }
    }

    fn learn(&mut self, x: &[f64; FEATURE_DIMS]) {
        match self {
            HstNode::Leaf { mass } => *mass += 1,
            HstNode::Internal {
                dim,
                split,
                mass,
                left,
                right,
            } => {
                *mass += 1;
                if x[*dim] < *split {
                    left.learn(x);
                } else {
                    right.learn(x);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HstTree {
    root: HstNode,
    max_depth: u32,
}

impl HstTree {
    fn new(max_depth: u32, rng: &mut StdRng) -> Self {
        Self {
            root: HstNode::build(0, max_depth, &INITIAL_RANGES, rng),
            max_depth,
        }
    }
}

/// Behavior contract (spec.md §4.6): `score_one` is 0 during warm-up,
/// `learn_one` is monotone and non-destructive under replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HstModel {
    trees: Vec<HstTree>,
    samples_seen: u64,
}

impl HstModel {
    pub fn new(seed: u64) -> Self {
        Self::with_params(seed, DEFAULT_NUM_TREES, DEFAULT_MAX_DEPTH)
    }

    pub fn with_params(seed: u64, num_trees: usize, max_depth: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let trees = (0..num_trees).map(|_| HstTree::new(max_depth, &mut rng)).collect();
        Self {
            trees,
            samples_seen: 0,
        }
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn score_one(&self, window: &FeatureWindow) -> f64 {
        if self.samples_seen < WARMUP_SAMPLES {
            return 0.0;
        }
        let x = window.as_vector();
        if self.trees.is_empty() {
            return 0.0;
        }

        let mut density_sum = 0.0;
        for tree in &self.trees {
            let (mass, depth) = tree.root.traverse(&x, 0);
            let max_mass_at_depth = self.samples_seen as f64;
            if max_mass_at_depth <= 0.0 {
                continue;
            }
            // Deeper, sparsely-populated leaves indicate a rarer region.
            let density = (mass as f64 / max_mass_at_depth) * 2f64.powi(depth as i32) / 2f64.powi(tree.max_depth as i32);
            density_sum += density;
        }
        let density = density_sum / self.trees.len() as f64;
        clamp01(1.0 - density)
    }

    pub fn learn_one(&mut self, window: &FeatureWindow) {
        let x = window.as_vector();
        for tree in &mut self.trees {
            tree.root.learn(&x);
        }
        self.samples_seen += 1;
    }
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
    fn scores_zero_during_warmup() {
        let mut model = HstModel::new(42);
        for _ in 0..(WARMUP_SAMPLES - 1) {
            model.learn_one(&window(100.0));
            assert_eq!(model.score_one(&window(100.0)), 0.0);
        }
    }

    #[test]
    fn learn_is_monotone_non_destructive_under_replay() {
        let mut model = HstModel::new(7);
        for _ in 0..WARMUP_SAMPLES {
            model.learn_one(&window(120.0));
        }
        let baseline = model.score_one(&window(120.0));
        // Replaying the same, already-learned window should not make the
        // model consider it *more* anomalous.
        model.learn_one(&window(120.0));
        let after_replay = model.score_one(&window(120.0));
        assert!(after_replay <= baseline + 1e-9);
    }

    #[test]
    fn novel_region_scores_higher_than_trained_region() {
        let mut model = HstModel::new(3);
        for _ in 0..(WARMUP_SAMPLES * 3) {
            model.learn_one(&window(100.0));
        }
        let familiar = model.score_one(&window(100.0));
        let novel = model.score_one(&window(900.0));
        assert!(novel >= familiar);
    }
}
