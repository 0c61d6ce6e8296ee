//! Orchestrator (spec.md §4.10): the only component that talks to both
//! stores. `ingest_keyboard`/`ingest_mouse` fold a batch into `SessionState`
//! and never produce a decision; `evaluate` is the fusion+decision entry
//! point, synchronous and reference-transparent apart from its two store
//! round trips (spec.md §5).

pub mod audit;
pub mod fusion;
pub mod learning;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, Millis};
use crate::config::SentinelConfig;
use crate::detectors::navigator::{self, RequestContext};
use crate::detectors::{physics, teleport};
use crate::error::{OrchestratorError, ValidationError};
use crate::extractors::{keyboard as kb_extract, mouse as mouse_extract};
use crate::model::event::{KeyboardBatch, MouseBatch};
use crate::model::session::{Mode, Phase, SessionState};
use crate::model::user_model::{ModelType, UserModel};
use crate::model::window::FeatureWindow;
use crate::models::hst::HstModel;
use crate::models::identity;
use crate::models::persist::{decode_hst, encode_hst};
use crate::store::{ColdStore, HotStore, HotStoreError, LearningLocks};
use audit::AuditRecord;
use fusion::{priority_override, threshold_decision, ComponentScores, Decision};

/// Body of `POST /evaluate` (spec.md §6). Only `session_id`/`eval_id`/
/// `request_context` feed scoring; the rest are ambient fields carried
/// straight into the audit record for the external Auditor to correlate
/// against, never read by fusion itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub session_id: String,
    pub eval_id: String,
    pub request_context: RequestContext,
    #[serde(default)]
    pub business_context: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub mfa_status: Option<String>,
    #[serde(default)]
    pub session_start_time: Option<Millis>,
    #[serde(default)]
    pub client_fingerprint: Option<String>,
}

/// Per-signal breakdown plus which override tags fired, named
/// `anomaly_vectors` in the wire response (spec.md §6, §4.11).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyVectors {
    pub kb_score: f64,
    pub mouse_score: f64,
    pub nav_score: f64,
    pub identity_risk: f64,
    pub identity_confidence: f64,
    pub triggered: Vec<&'static str>,
}

impl From<ComponentScores> for AnomalyVectors {
    fn from(scores: ComponentScores) -> Self {
        Self {
            kb_score: scores.kb_score,
            mouse_score: scores.mouse_score,
            nav_score: scores.nav_score,
            identity_risk: scores.identity_risk,
            identity_confidence: scores.identity_confidence,
            triggered: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub decision: Decision,
    pub risk: f64,
    pub mode: Mode,
    pub anomaly_vectors: AnomalyVectors,
    pub ban_expires_in_seconds: Option<i64>,
}

impl EvaluateResponse {
    fn from_audit(record: &AuditRecord) -> Self {
        let mut anomaly_vectors = AnomalyVectors::from(record.component_scores);
        if let Some(reason) = record.reason {
            anomaly_vectors.triggered.push(reason);
        }
        Self {
            decision: record.decision,
            risk: record.risk,
            mode: record.mode,
            anomaly_vectors,
            ban_expires_in_seconds: record.ban_expires_in_seconds,
        }
    }
}

/// Outcome of one pass through the fusion pipeline, captured from inside
/// the hot-state transaction so the orchestrator can act on it (learning
/// dispatch, ban/strike side-table writes, audit) once the winning
/// mutation has actually committed.
struct EvalOutcome {
    decision: Decision,
    reason: Option<&'static str>,
    final_risk: f64,
    scores: ComponentScores,
    windows_for_hst: Vec<FeatureWindow>,
    windows_for_identity: Vec<FeatureWindow>,
}

pub struct Orchestrator {
    hot: Arc<dyn HotStore>,
    cold: Arc<dyn ColdStore>,
    locks: LearningLocks,
    clock: Arc<dyn Clock>,
    config: SentinelConfig,
}

impl Orchestrator {
    pub fn new(hot: Arc<dyn HotStore>, cold: Arc<dyn ColdStore>, clock: Arc<dyn Clock>, config: SentinelConfig) -> Self {
        Self {
            hot,
            cold,
            locks: LearningLocks::new(),
            clock,
            config,
        }
    }

    /// spec.md §4.10 "ingest_keyboard/ingest_mouse": rejects non-sequential
    /// batches at the door (no mutation), gap-resets the window accumulator
    /// when the jump from the high-water mark exceeds `batch_gap_reset`.
    pub fn ingest_keyboard(&self, batch: &KeyboardBatch) -> Result<(), OrchestratorError> {
        let now = self.clock.now_ms();
        let current = self.hot.get(&batch.session_id, now)?;
        let last = current.as_ref().map(|s| s.last_kb_batch_id).unwrap_or(0);
        if batch.batch_id <= last {
            return Err(ValidationError::NonSequentialBatch {
                received: batch.batch_id,
                high_water_mark: last,
            }
            .into());
        }
        let gap_reset = batch.batch_id - last > self.config.ingest.batch_gap_reset;

        self.hot.update_transactional(
            &batch.session_id,
            now,
            self.config.store.hot_store_retries,
            &mut |cur| {
                let mut state = cur.unwrap_or_else(|| SessionState::new(batch.session_id.clone(), batch.user_id.clone(), now));
                if batch.batch_id <= state.last_kb_batch_id {
                    return state;
                }
                if gap_reset {
                    state.reset_keyboard_windows();
                    state.add_gap_strike();
                }
                state.last_kb_batch_id = batch.batch_id;
                state.last_activity = now;
                kb_extract::ingest_keyboard_events(&mut state, &batch.events, &self.config.keyboard, now);
                state
            },
        )?;
        Ok(())
    }

    pub fn ingest_mouse(&self, batch: &MouseBatch) -> Result<(), OrchestratorError> {
        let now = self.clock.now_ms();
        let current = self.hot.get(&batch.session_id, now)?;
        let last = current.as_ref().map(|s| s.last_mouse_batch_id).unwrap_or(0);
        if batch.batch_id <= last {
            return Err(ValidationError::NonSequentialBatch {
                received: batch.batch_id,
                high_water_mark: last,
            }
            .into());
        }
        let gap_reset = batch.batch_id - last > self.config.ingest.batch_gap_reset;
        let physics_cfg = self.config.physics;

        self.hot.update_transactional(
            &batch.session_id,
            now,
            self.config.store.hot_store_retries,
            &mut |cur| {
                let mut state = cur.unwrap_or_else(|| SessionState::new(batch.session_id.clone(), batch.user_id.clone(), now));
                if batch.batch_id <= state.last_mouse_batch_id {
                    return state;
                }
                if gap_reset {
                    state.move_count_since_last_click = 0;
                    state.add_gap_strike();
                }
                state.last_mouse_batch_id = batch.batch_id;
                state.last_activity = now;

                teleport::ingest_mouse_events(&mut state, &batch.events);
                let segments = mouse_extract::stroke_segments(&batch.events);
                let score = physics::physics_score(&batch.events, &segments, &physics_cfg);
                state.last_mouse_score = score.max(state.teleport_ratio());
                state
            },
        )?;
        Ok(())
    }

    /// spec.md §4.10 `evaluate`, steps 1-11.
    pub fn evaluate(&self, req: &EvaluateRequest) -> Result<EvaluateResponse, OrchestratorError> {
        let now = self.clock.now_ms();

        if let Some(prior) = audit::find_prior(self.cold.as_ref(), &req.eval_id)? {
            return Ok(EvaluateResponse::from_audit(&prior));
        }

        // Step 1: hydrate. No prior ingest for this session is a fail-safe
        // CHALLENGE rather than a crash — spec.md's body assumes a session
        // already exists, but the wire contract can't enforce that. A
        // hot-store error at this point is also fail-safe (spec.md §7): no
        // error is ever propagated to the caller other than via the
        // decision itself.
        let peek = match self.hot.get(&req.session_id, now) {
            Ok(v) => v,
            Err(e) => return self.fail_safe_response(req, "", Mode::Normal, hot_store_failure_reason(&e), now),
        };
        let Some(peek) = peek else {
            let record = AuditRecord {
                eval_id: req.eval_id.clone(),
                session_id: req.session_id.clone(),
                user_id: String::new(),
                ts: now,
                decision: Decision::Challenge,
                risk: 1.0,
                mode: Mode::Normal,
                reason: Some("no_session"),
                component_scores: ComponentScores::default(),
                context: req.request_context.clone(),
                ban_expires_in_seconds: None,
            };
            audit::emit(self.cold.as_ref(), &record)?;
            return Ok(EvaluateResponse::from_audit(&record));
        };

        // Step 2: ban check.
        let ban = match self.hot.get_ban(&peek.user_id, now) {
            Ok(v) => v,
            Err(e) => return self.fail_safe_response(req, &peek.user_id, peek.mode, hot_store_failure_reason(&e), now),
        };
        if let Some(ban) = ban {
            let remaining = ((ban.expires_at_ms - now) / 1000).max(0);
            let record = AuditRecord {
                eval_id: req.eval_id.clone(),
                session_id: req.session_id.clone(),
                user_id: peek.user_id.clone(),
                ts: now,
                decision: Decision::Block,
                risk: 1.0,
                mode: peek.mode,
                reason: Some("banned"),
                component_scores: ComponentScores::default(),
                context: req.request_context.clone(),
                ban_expires_in_seconds: Some(remaining),
            };
            audit::emit(self.cold.as_ref(), &record)?;
            return Ok(EvaluateResponse::from_audit(&record));
        }

        // Models are read once per evaluate; retries inside
        // `update_transactional` see the same snapshot, keeping the closure
        // a deterministic function of `(cur, these models, now)` (spec.md
        // §5). A cold-store load failure continues with `cold_start=true`
        // for the affected model rather than aborting evaluate (spec.md
        // §7); `decode_hst`/the fusion math already treat `None` as cold
        // start, so a failed load just becomes a missing blob.
        let hst_blob = self.cold.load(&peek.user_id, ModelType::KeyboardHst).unwrap_or_else(|e| {
            log::warn!("cold store unavailable loading hst model for user={}: {e}", peek.user_id);
            None
        });
        let identity_blob = self.cold.load(&peek.user_id, ModelType::KeyboardIdentity).unwrap_or_else(|e| {
            log::warn!("cold store unavailable loading identity model for user={}: {e}", peek.user_id);
            None
        });
        let hst_model = hst_blob.as_ref().and_then(|m| decode_hst(&m.model_blob));
        let identity_model = identity_blob.as_ref().and_then(|m| decode_hst(&m.model_blob));
        let identity_feature_window_count = identity_blob.as_ref().map(|m| m.feature_window_count).unwrap_or(0);

        let mut outcome: Option<EvalOutcome> = None;
        let final_session = match self.hot.update_transactional(
            &req.session_id,
            now,
            self.config.store.hot_store_retries,
            &mut |cur| {
                let mut session = cur.unwrap_or_else(|| SessionState::new(peek.session_id.clone(), peek.user_id.clone(), now));
                let computed = self.run_evaluation(
                    &mut session,
                    &req.request_context,
                    now,
                    hst_model.as_ref(),
                    identity_model.as_ref(),
                    identity_feature_window_count,
                );
                outcome = Some(computed);
                session
            },
        ) {
            Ok(v) => v,
            Err(e) => return self.fail_safe_response(req, &peek.user_id, peek.mode, hot_store_failure_reason(&e), now),
        };
        let outcome = outcome.expect("update_transactional always invokes the closure at least once");

        // Side-table effects driven by the winning commit.
        if outcome.decision == Decision::Block {
            self.hot.set_ban(
                &final_session.user_id,
                outcome.reason.unwrap_or("fused_risk").to_string(),
                self.config.ban.provisional_ban_ttl_secs,
                now,
            )?;
            self.hot.incr_strike(&final_session.user_id, self.config.ban.strike_ttl_days, now)?;
        }

        self.dispatch_learning(&final_session, &outcome, now, identity_blob);

        let mut anomaly_vectors = AnomalyVectors::from(outcome.scores);
        if let Some(reason) = outcome.reason {
            anomaly_vectors.triggered.push(reason);
        }

        let record = AuditRecord {
            eval_id: req.eval_id.clone(),
            session_id: req.session_id.clone(),
            user_id: final_session.user_id.clone(),
            ts: now,
            decision: outcome.decision,
            risk: outcome.final_risk,
            mode: final_session.mode,
            reason: outcome.reason,
            component_scores: outcome.scores,
            context: req.request_context.clone(),
            ban_expires_in_seconds: if outcome.decision == Decision::Block {
                Some(self.config.ban.provisional_ban_ttl_secs as i64)
            } else {
                None
            },
        };
        audit::emit(self.cold.as_ref(), &record)?;

        Ok(EvaluateResponse {
            decision: outcome.decision,
            risk: outcome.final_risk,
            mode: final_session.mode,
            anomaly_vectors,
            ban_expires_in_seconds: record.ban_expires_in_seconds,
        })
    }

    /// Synthesizes a fail-safe CHALLENGE response in place of a propagated
    /// hot-store error (spec.md §7: "No error is propagated to the
    /// user-visible response other than via the decision itself"). `user_id`
    /// is empty when the error strikes before any session was hydrated.
    fn fail_safe_response(
        &self,
        req: &EvaluateRequest,
        user_id: &str,
        mode: Mode,
        reason: &'static str,
        now: Millis,
    ) -> Result<EvaluateResponse, OrchestratorError> {
        let record = AuditRecord {
            eval_id: req.eval_id.clone(),
            session_id: req.session_id.clone(),
            user_id: user_id.to_string(),
            ts: now,
            decision: Decision::Challenge,
            risk: 1.0,
            mode,
            reason: Some(reason),
            component_scores: ComponentScores::default(),
            context: req.request_context.clone(),
            ban_expires_in_seconds: None,
        };
        audit::emit(self.cold.as_ref(), &record)?;
        Ok(EvaluateResponse::from_audit(&record))
    }

    /// Steps 3-9: component scores, override chain, fusion, thresholding,
    /// trust stabilizer, phase transitions, bookkeeping. Mutates `session`
    /// in place and returns what the caller needs once this mutation wins
    /// its optimistic commit.
    #[allow(clippy::too_many_arguments)]
    fn run_evaluation(
        &self,
        session: &mut SessionState,
        ctx: &RequestContext,
        now: Millis,
        hst_model: Option<&HstModel>,
        identity_model: Option<&HstModel>,
        identity_feature_window_count: u32,
    ) -> EvalOutcome {
        let kb_cfg = &self.config.keyboard;
        let recent: Vec<FeatureWindow> = session.completed_windows.iter().take(5).cloned().collect();

        let kb_confidence = kb_extract::kb_confidence(session, kb_cfg, now);
        let kb_score = match hst_model {
            Some(model) if !recent.is_empty() => {
                let sum: f64 = recent.iter().map(|w| model.score_one(w)).sum();
                (sum / recent.len() as f64) * kb_confidence
            }
            _ => 0.0,
        };

        let mouse_score = session.last_mouse_score;

        let nav_outcome = navigator::evaluate(session, ctx, &self.config.navigator, now);

        let identity_outcome = identity::evaluate(identity_model, &recent, identity_feature_window_count, self.config.identity.samples_required);

        let scores = ComponentScores {
            kb_score: crate::util::clamp01(kb_score),
            mouse_score: crate::util::clamp01(mouse_score),
            nav_score: nav_outcome.nav_score,
            identity_risk: identity_outcome.identity_risk,
            identity_confidence: identity_outcome.identity_confidence,
        };
        session.last_kb_score = scores.kb_score;
        session.last_mouse_score = scores.mouse_score;
        session.last_nav_score = scores.nav_score;
        session.last_identity_score = scores.identity_risk;
        session.last_identity_confidence = scores.identity_confidence;

        // Step 4: priority override chain.
        let override_hit = priority_override(session, &scores, nav_outcome.nav_decision, self.config.ban.strike_limit, kb_cfg.count_maturity);

        // Step 5-6: fusion + threshold.
        let final_risk = fusion::final_risk(&scores, session.mode, &self.config.weights);
        let (decision, reason) = match override_hit {
            Some((d, r)) => (d, Some(r)),
            None => (threshold_decision(final_risk, session.mode, &self.config.thresholds), None),
        };

        // Step 7: trust stabilizer.
        session.trust_score = crate::util::clamp01(session.trust_score + self.config.trust.trust_delta * (0.5 - final_risk));
        let trust_crash = scores.identity_risk >= 0.9;
        if trust_crash {
            session.trust_score = 0.0;
        }

        // Step 8: phase transitions. TRUSTED is shared between `phase` and
        // `mode` (the latter is what fusion/threshold actually read), so
        // entering/leaving the TRUSTED phase flips `mode` alongside it.
        let time_confidence = kb_extract::time_confidence(session, kb_cfg, now);
        if session.phase == Phase::Unknown && session.kb_window_count >= kb_cfg.count_maturity && time_confidence >= 1.0 {
            session.phase = Phase::Verifying;
        }
        if session.phase == Phase::Verifying && session.trust_score >= self.config.trust.trusted_threshold {
            session.phase = Phase::Trusted;
            session.mode = Mode::Trusted;
        }
        if trust_crash && session.phase == Phase::Trusted {
            session.phase = Phase::Unknown;
            session.mode = Mode::Normal;
        }

        // Step 9: post-decision bookkeeping.
        match decision {
            Decision::Allow => {
                session.consecutive_allows += 1;
            }
            Decision::Challenge => {
                session.mode = Mode::Challenge;
                session.consecutive_allows = 0;
            }
            Decision::Block => {
                session.strike_count += 1;
                session.trust_score = 0.0;
                session.consecutive_allows = 0;
                session.phase = Phase::Unknown;
                session.mode = Mode::Normal;
            }
        }

        // Step 10: selective learning gate — decide which windows are
        // eligible; the actual cold-store write happens after this
        // mutation commits (dispatch_learning).
        let suspended_before = learning::is_learning_suspended(session, now);
        learning::update_learning_suspension(session, scores.nav_score, now, &self.config.learning);

        let available_windows: Vec<FeatureWindow> = session.completed_windows.iter().cloned().collect();

        let windows_for_identity = if learning::identity_should_learn(session, scores.nav_score, suspended_before, now, 0.65, 5, 30.0) {
            available_windows.clone()
        } else {
            Vec::new()
        };

        let hst_cold_start = session.kb_window_count < kb_cfg.count_maturity;
        let windows_for_hst = if learning::hst_should_learn(session, decision, suspended_before, kb_cfg.count_maturity) {
            available_windows
        } else {
            Vec::new()
        };
        if hst_cold_start && !windows_for_hst.is_empty() {
            session.clear_completed_windows();
        }

        session.last_activity = now;

        EvalOutcome {
            decision,
            reason,
            final_risk,
            scores,
            windows_for_hst,
            windows_for_identity,
        }
    }

    /// Dispatches HST/identity learning outside the hot-state transaction,
    /// behind the non-blocking per-user lock (spec.md §4.8, §5).
    fn dispatch_learning(&self, session: &SessionState, outcome: &EvalOutcome, now: Millis, identity_row: Option<UserModel>) {
        if !outcome.windows_for_hst.is_empty() {
            if let Some(_guard) = self.locks.try_acquire(&session.user_id, ModelType::KeyboardHst) {
                let windows = outcome.windows_for_hst.clone();
                let result = self.cold.learn_with_retry(
                    &session.user_id,
                    ModelType::KeyboardHst,
                    self.config.learning.max_conflict_retries,
                    &mut |current| learn_hst_model(current, &session.user_id, ModelType::KeyboardHst, &windows, now),
                );
                if let Err(e) = result {
                    log::warn!("hst learning pass for user={} failed: {e}", session.user_id);
                }
            }
        }

        if !outcome.windows_for_identity.is_empty() {
            if let Some(_guard) = self.locks.try_acquire(&session.user_id, ModelType::KeyboardIdentity) {
                let hst_ref = identity_row
                    .as_ref()
                    .and_then(|m| decode_hst(&m.model_blob))
                    .unwrap_or_else(|| HstModel::new(seed_for(&session.user_id)));
                let filtered = learning::filter_windows_for_identity(&outcome.windows_for_identity, &hst_ref);
                let result = self.cold.learn_with_retry(
                    &session.user_id,
                    ModelType::KeyboardIdentity,
                    self.config.learning.max_conflict_retries,
                    &mut |current| learn_hst_model(current, &session.user_id, ModelType::KeyboardIdentity, &filtered, now),
                );
                if let Err(e) = result {
                    log::warn!("identity learning pass for user={} failed: {e}", session.user_id);
                }
            }
        }
    }
}

/// Maps a hot-store error to the CHALLENGE reason spec.md §7 prescribes:
/// `fail_safe` for outright unavailability, a distinct tag for an
/// optimistic-concurrency retry budget exhausted mid-evaluate.
fn hot_store_failure_reason(err: &HotStoreError) -> &'static str {
    match err {
        HotStoreError::ConflictExhausted => "transient_conflict",
        HotStoreError::Unavailable | HotStoreError::Timeout => "fail_safe",
    }
}

fn seed_for(user_id: &str) -> u64 {
    user_id.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

fn learn_hst_model(current: Option<UserModel>, user_id: &str, model_type: ModelType, windows: &[FeatureWindow], now: Millis) -> UserModel {
    let mut model = current
        .as_ref()
        .and_then(|m| decode_hst(&m.model_blob))
        .unwrap_or_else(|| HstModel::new(seed_for(user_id)));
    for w in windows {
        model.learn_one(w);
    }
    let feature_window_count = current.as_ref().map(|m| m.feature_window_count).unwrap_or(0) + windows.len() as u32;
    UserModel {
        user_id: user_id.to_string(),
        model_type,
        model_blob: encode_hst(&model),
        feature_window_count,
        version: 0, // placeholder; ColdStore::save/learn_with_retry derives the real version from expected_version
        updated_at: now,
    }
}
