//! Audit record emission (spec.md §4.11). One record per `evaluate` call,
//! idempotent on `eval_id`, persisted to the cold store's append-only log.

use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::detectors::navigator::RequestContext;
use crate::model::session::Mode;
use crate::orchestrator::fusion::{ComponentScores, Decision};
use crate::store::{ColdStore, ColdStoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub eval_id: String,
    pub session_id: String,
    pub user_id: String,
    pub ts: Millis,
    pub decision: Decision,
    pub risk: f64,
    pub mode: Mode,
    pub reason: Option<&'static str>,
    pub component_scores: ComponentScores,
    pub context: RequestContext,
    pub ban_expires_in_seconds: Option<i64>,
}

/// Writes the record; a duplicate `eval_id` is silently absorbed by
/// `ColdStore::append_audit`'s `INSERT OR IGNORE`.
pub fn emit(cold: &dyn ColdStore, record: &AuditRecord) -> Result<(), ColdStoreError> {
    let payload = serde_json::to_string(record).expect("AuditRecord is always representable as JSON");
    cold.append_audit(&record.eval_id, &record.session_id, &record.user_id, record.ts, &payload)
}

/// Looks up a prior decision for this `eval_id`, if one was already
/// recorded (spec.md §4.11 idempotency).
pub fn find_prior(cold: &dyn ColdStore, eval_id: &str) -> Result<Option<AuditRecord>, ColdStoreError> {
    let Some(payload) = cold.find_audit(eval_id)? else {
        return Ok(None);
    };
    match serde_json::from_str(&payload) {
        Ok(record) => Ok(Some(record)),
        Err(_) => Ok(None),
    }
}
