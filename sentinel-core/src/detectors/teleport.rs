//! Teleportation detector (spec.md §4.4).
//!
//! Click-to-click cursor teleportation: a CLICK preceded by fewer than 3
//! MOVEs since the last CLICK is counted as a teleport click. State lives on
//! `SessionState` since it accumulates across batches for the session's
//! lifetime, not just the current one.

use crate::model::event::{MouseEvent, MouseEventKind};
use crate::model::session::SessionState;

const MIN_MOVES_BEFORE_CLICK: u32 = 3;

pub fn ingest_mouse_events(session: &mut SessionState, events: &[MouseEvent]) {
    for ev in events {
        match ev.kind {
            MouseEventKind::Move => {
                session.move_count_since_last_click += 1;
            }
            MouseEventKind::Click => {
                if session.move_count_since_last_click < MIN_MOVES_BEFORE_CLICK {
                    session.teleport_clicks += 1;
                }
                session.total_clicks += 1;
                session.move_count_since_last_click = 0;
            }
        }
    }
}

pub fn teleport_ratio(session: &SessionState) -> f64 {
    session.teleport_ratio()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(t: f64) -> MouseEvent {
        MouseEvent {
            x: 0.0,
            y: 0.0,
            kind: MouseEventKind::Move,
            t,
        }
    }

    fn click(t: f64) -> MouseEvent {
        MouseEvent {
            x: 0.0,
            y: 0.0,
            kind: MouseEventKind::Click,
            t,
        }
    }

    #[test]
    fn immediate_click_counts_as_teleport() {
        let mut session = SessionState::new("s", "u", 0);
        ingest_mouse_events(&mut session, &[mv(0.0), click(1.0)]);
        assert_eq!(session.teleport_clicks, 1);
        assert_eq!(session.total_clicks, 1);
        assert_eq!(teleport_ratio(&session), 1.0);
    }

    #[test]
    fn sufficient_moves_avoid_teleport_flag() {
        let mut session = SessionState::new("s", "u", 0);
        ingest_mouse_events(
            &mut session,
            &[mv(0.0), mv(1.0), mv(2.0), click(3.0)],
        );
        assert_eq!(session.teleport_clicks, 0);
        assert_eq!(session.total_clicks, 1);
        assert_eq!(teleport_ratio(&session), 0.0);
    }

    #[test]
    fn move_counter_resets_after_each_click() {
        let mut session = SessionState::new("s", "u", 0);
        ingest_mouse_events(
            &mut session,
            &[mv(0.0), mv(1.0), mv(2.0), click(3.0), click(4.0)],
        );
        assert_eq!(session.teleport_clicks, 1); // second click had 0 moves
        assert_eq!(session.total_clicks, 2);
    }
}
