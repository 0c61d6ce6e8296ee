//! Mouse feature extractor (spec.md §4.2).
//!
//! Per stroke segment (three consecutive MOVEs), derives velocity,
//! acceleration, jerk, angular velocity and curvature. Feeds the physics
//! detector and the teleportation counter only — never persisted, per the
//! spec: each mouse batch is reduced to `last_mouse_score` on ingest and the
//! raw points are discarded.

use crate::model::event::{MouseEvent, MouseEventKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeSegment {
    pub t: f64,
    pub dt: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub jerk: f64,
    pub angular_velocity: f64,
    pub curvature: f64,
}

/// Builds per-segment kinematics from a run of MOVE events. CLICK events
/// are not part of the stroke geometry (handled by the teleportation
/// detector) and are skipped here.
pub fn stroke_segments(events: &[MouseEvent]) -> Vec<StrokeSegment> {
    let moves: Vec<&MouseEvent> = events
        .iter()
        .filter(|e| e.kind == MouseEventKind::Move)
        .collect();

    if moves.len() < 4 {
        return Vec::new();
    }

    let mut velocities = Vec::with_capacity(moves.len() - 1);
    let mut angles = Vec::with_capacity(moves.len() - 1);
    for w in moves.windows(2) {
        let (a, b) = (w[0], w[1]);
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let dt = (b.t - a.t).max(f64::EPSILON);
        let dist = (dx * dx + dy * dy).sqrt();
        velocities.push((dist / dt, dt, b.t));
        angles.push(dy.atan2(dx));
    }

    let mut accelerations = Vec::with_capacity(velocities.len() - 1);
    for w in velocities.windows(2) {
        let (v0, dt0, _) = w[0];
        let (v1, dt1, _) = w[1];
        let dt = ((dt0 + dt1) / 2.0).max(f64::EPSILON);
        accelerations.push((v1 - v0) / dt);
    }

    let mut segments = Vec::with_capacity(accelerations.len() - 1);
    for i in 0..accelerations.len().saturating_sub(1) {
        let (_, dt, t) = velocities[i + 1];
        let jerk = (accelerations[i + 1] - accelerations[i]) / dt.max(f64::EPSILON);
        let angular_velocity = (angles[i + 1] - angles[i]) / dt.max(f64::EPSILON);
        // Curvature via Menger's formula over three consecutive points.
        let (p0, p1, p2) = (moves[i], moves[i + 1], moves[i + 2]);
        let curvature = menger_curvature(
            (p0.x, p0.y),
            (p1.x, p1.y),
            (p2.x, p2.y),
        );

        segments.push(StrokeSegment {
            t,
            dt,
            velocity: velocities[i + 1].0,
            acceleration: accelerations[i + 1],
            jerk,
            angular_velocity,
            curvature,
        });
    }
    segments
}

fn menger_curvature(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    let area = ((b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)).abs() / 2.0;
    let ab = dist(a, b);
    let bc = dist(b, c);
    let ca = dist(c, a);
    let denom = ab * bc * ca;
    if denom < f64::EPSILON {
        0.0
    } else {
        4.0 * area / denom
    }
}

fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::MouseEventKind;

    fn mv(x: f64, y: f64, t: f64) -> MouseEvent {
        MouseEvent {
            x,
            y,
            kind: MouseEventKind::Move,
            t,
        }
    }

    #[test]
    fn too_few_points_yields_no_segments() {
        let events = vec![mv(0.0, 0.0, 0.0), mv(1.0, 0.0, 10.0)];
        assert!(stroke_segments(&events).is_empty());
    }

    #[test]
    fn straight_line_has_zero_curvature() {
        let events = vec![
            mv(0.0, 0.0, 0.0),
            mv(10.0, 0.0, 10.0),
            mv(20.0, 0.0, 20.0),
            mv(30.0, 0.0, 30.0),
            mv(40.0, 0.0, 40.0),
        ];
        let segs = stroke_segments(&events);
        assert!(!segs.is_empty());
        for s in &segs {
            assert!(s.curvature.abs() < 1e-6, "curvature: {}", s.curvature);
        }
    }
}
