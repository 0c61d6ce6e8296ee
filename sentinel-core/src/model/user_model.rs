//! Cold-state persisted model record (spec.md §3 "UserModel").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    KeyboardHst,
    KeyboardIdentity,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::KeyboardHst => "keyboard_hst",
            ModelType::KeyboardIdentity => "keyboard_identity",
        }
    }
}

/// Row shape for `user_behavior_models` (spec.md §6). `model_blob` is the
/// decoded bytes; base64 is an encoding concern handled at the store
/// boundary (spec.md §4.8, §6 "Blob encoding contract"), not part of the
/// in-memory value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserModel {
    pub user_id: String,
    pub model_type: ModelType,
    pub model_blob: Vec<u8>,
    pub feature_window_count: u32,
    pub version: i64,
    pub updated_at: i64,
}
