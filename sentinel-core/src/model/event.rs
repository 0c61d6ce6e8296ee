//! Wire-level event types (spec.md §3, "Event" / "StreamBatch").

use serde::{Deserialize, Serialize};

/// Monotonic float milliseconds, as produced by the client's own clock.
/// Not comparable across sessions, only within one stream.
pub type EventTimeMs = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyEventKind {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MouseEventKind {
    Move,
    Click,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    pub kind: KeyEventKind,
    pub t: EventTimeMs,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MouseEvent {
    pub x: f64,
    pub y: f64,
    pub kind: MouseEventKind,
    pub t: EventTimeMs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyboardBatch {
    pub session_id: String,
    pub user_id: String,
    pub batch_id: i64,
    pub events: Vec<KeyEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseBatch {
    pub session_id: String,
    pub user_id: String,
    pub batch_id: i64,
    pub events: Vec<MouseEvent>,
}
