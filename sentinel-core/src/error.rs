//! Crate-wide error kinds. Component-specific detail lives in
//! `store::hot::HotStoreError` / `store::cold::ColdStoreError`; this module
//! holds the orchestrator-level envelope that §7 of the spec maps onto the
//! externally visible behavior (400 / 429 / 503 / CHALLENGE / silent no-op).

use thiserror::Error;

use crate::store::cold::ColdStoreError;
use crate::store::hot::HotStoreError;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("batch_id {received} is not greater than high-water mark {high_water_mark}")]
    NonSequentialBatch {
        received: i64,
        high_water_mark: i64,
    },

    #[error("malformed event stream: {0}")]
    BadSchema(String),
}

/// Top-level error surfaced by orchestrator entry points. Per spec.md §7,
/// none of these ever reach the user except by way of the decision they
/// cause the orchestrator to pick.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("hot store: {0}")]
    HotStore(#[from] HotStoreError),

    #[error("cold store: {0}")]
    ColdStore(#[from] ColdStoreError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
