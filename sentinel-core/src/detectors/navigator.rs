//! Navigator policy engine (spec.md §4.5). Stateless rule evaluation over
//! the request's environment, plus TOFU pinning against the session.

use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::model::session::{SessionState, TofuContext};
use crate::util::clamp01;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: String,
    pub endpoint: String,
    pub method: String,
    pub device_id: String,
    /// Coarse UA classification (e.g. "chrome-desktop", "headless"),
    /// computed by the transport layer or upstream middleware — GeoIP and
    /// UA parsing are external collaborators per spec.md §1.
    pub ua_class: String,
    pub ip_geo_country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavDecision {
    Ok,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigatorConfig {
    pub known_ua_classes: Vec<String>,
    pub unknown_ua_penalty: f64,
    pub tofu_deviation_penalty: f64,
    /// A pinned country changing within this many seconds of the last
    /// stable observation is treated as physically impossible travel.
    pub impossible_travel_window_secs: i64,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            known_ua_classes: vec![
                "chrome-desktop".to_string(),
                "firefox-desktop".to_string(),
                "safari-desktop".to_string(),
                "edge-desktop".to_string(),
            ],
            unknown_ua_penalty: 0.4,
            tofu_deviation_penalty: 0.3,
            impossible_travel_window_secs: 300,
        }
    }
}

pub struct NavigatorOutcome {
    pub nav_score: f64,
    pub nav_decision: NavDecision,
    pub pinned_tofu_this_call: bool,
}

pub fn evaluate(
    session: &mut SessionState,
    ctx: &RequestContext,
    cfg: &NavigatorConfig,
    now_ms: Millis,
) -> NavigatorOutcome {
    if session.tofu_context.is_none() {
        session.tofu_context = Some(TofuContext {
            ua_class: ctx.ua_class.clone(),
            device_id: ctx.device_id.clone(),
            ip_geo_country: ctx.ip_geo_country.clone(),
        });
        session.context_stable_since = Some(now_ms);
        return NavigatorOutcome {
            nav_score: 0.0,
            nav_decision: NavDecision::Ok,
            pinned_tofu_this_call: true,
        };
    }

    let tofu = session.tofu_context.clone().expect("checked above");
    let mut score = 0.0;

    if !cfg.known_ua_classes.iter().any(|k| k == &ctx.ua_class) {
        score += cfg.unknown_ua_penalty;
    }

    let mut deviated = false;
    if ctx.ua_class != tofu.ua_class {
        score += cfg.tofu_deviation_penalty;
        deviated = true;
    }
    if ctx.device_id != tofu.device_id {
        score += cfg.tofu_deviation_penalty;
        deviated = true;
    }
    let country_changed = ctx.ip_geo_country != tofu.ip_geo_country;
    if country_changed {
        score += cfg.tofu_deviation_penalty;
        deviated = true;
    }

    let mut decision = NavDecision::Ok;
    if country_changed {
        let elapsed = session
            .context_stable_since
            .map(|since| now_ms - since)
            .unwrap_or(i64::MAX);
        if elapsed < cfg.impossible_travel_window_secs * 1000 {
            decision = NavDecision::Block;
        }
    }

    if deviated {
        session.context_stable_since = Some(now_ms);
    } else if session.context_stable_since.is_none() {
        session.context_stable_since = Some(now_ms);
    }

    NavigatorOutcome {
        nav_score: clamp01(score),
        nav_decision: decision,
        pinned_tofu_this_call: false,
    }
}
