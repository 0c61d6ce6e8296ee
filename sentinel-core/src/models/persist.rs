//! (De)serialization of `HstModel` to/from the opaque `UserModel::model_blob`
//! (spec.md §3 "UserModel"). Matches the corpus's bincode-over-serde pattern
//! rather than hand-rolling a binary format.

use crate::models::hst::HstModel;

pub fn encode_hst(model: &HstModel) -> Vec<u8> {
    bincode::serde::encode_to_vec(model, bincode::config::standard()).expect("HstModel is always bincode-representable")
}

/// A blob that fails to decode is treated the same as "no model yet" —
/// the caller falls back to cold-start rather than erroring the request.
pub fn decode_hst(blob: &[u8]) -> Option<HstModel> {
    bincode::serde::decode_from_slice(blob, bincode::config::standard())
        .map(|(model, _): (HstModel, usize)| model)
        .ok()
}
