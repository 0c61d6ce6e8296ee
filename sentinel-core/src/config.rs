//! Recognized configuration options (spec.md §6 "Configuration").
//!
//! Mirrors the teacher's `serde(default = "...")` config shape: a flat
//! struct of small sub-configs, each independently deserializable so a
//! partial TOML document still loads with sane defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::detectors::navigator::NavigatorConfig;
use crate::detectors::physics::PhysicsConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyboardWindowConfig {
    #[serde(default = "default_kb_window_size")]
    pub window_size: u32,
    #[serde(default = "default_kb_window_step")]
    pub window_step: u32,
    #[serde(default = "default_kb_count_maturity")]
    pub count_maturity: u32,
    #[serde(default = "default_kb_time_maturity_s")]
    pub time_maturity_secs: f64,
    /// Bound on `SessionState::completed_windows` (spec.md §3 calls it
    /// "bounded" without naming a number). Must stay >= 5 (fusion's
    /// lookback, §4.6) and comfortably above what a single evaluate's
    /// identity learning pass can drain (§4.10 step 10, uncapped).
    #[serde(default = "default_completed_windows_capacity")]
    pub completed_windows_capacity: usize,
}

impl Default for KeyboardWindowConfig {
    fn default() -> Self {
        Self {
            window_size: default_kb_window_size(),
            window_step: default_kb_window_step(),
            count_maturity: default_kb_count_maturity(),
            time_maturity_secs: default_kb_time_maturity_s(),
            completed_windows_capacity: default_completed_windows_capacity(),
        }
    }
}

fn default_kb_window_size() -> u32 {
    50
}
fn default_kb_window_step() -> u32 {
    5
}
fn default_kb_count_maturity() -> u32 {
    50
}
fn default_kb_time_maturity_s() -> f64 {
    20.0
}
fn default_completed_windows_capacity() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_samples_required")]
    pub samples_required: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            samples_required: default_identity_samples_required(),
        }
    }
}

fn default_identity_samples_required() -> u32 {
    150
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    #[serde(default = "default_trusted_threshold")]
    pub trusted_threshold: f64,
    #[serde(default = "default_trust_delta")]
    pub trust_delta: f64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted_threshold: default_trusted_threshold(),
            trust_delta: default_trust_delta(),
        }
    }
}

fn default_trusted_threshold() -> f64 {
    0.75
}
fn default_trust_delta() -> f64 {
    0.12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanConfig {
    #[serde(default = "default_strike_ttl_days")]
    pub strike_ttl_days: u32,
    /// TTL Sentinel itself ever writes (spec.md §5: "Sentinel MAY only
    /// write with provisional TTL"); the longer 1h/24h tiers in spec.md §3's
    /// Ban table belong to the external Auditor pipeline (out of scope,
    /// §1) and are never produced by this crate.
    #[serde(default = "default_provisional_ban_ttl_s")]
    pub provisional_ban_ttl_secs: u64,
    /// Per-session strike count that forces a BLOCK outright (spec.md
    /// §4.10 override #1).
    #[serde(default = "default_strike_limit")]
    pub strike_limit: u32,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            strike_ttl_days: default_strike_ttl_days(),
            provisional_ban_ttl_secs: default_provisional_ban_ttl_s(),
            strike_limit: default_strike_limit(),
        }
    }
}

fn default_strike_ttl_days() -> u32 {
    7
}
fn default_provisional_ban_ttl_s() -> u64 {
    300
}
fn default_strike_limit() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_batch_gap_reset")]
    pub batch_gap_reset: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_gap_reset: default_batch_gap_reset(),
        }
    }
}

fn default_batch_gap_reset() -> i64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_learn_suspend_on")]
    pub suspend_on_nav_score: f64,
    #[serde(default = "default_learn_resume_after_s")]
    pub resume_after_secs: u64,
    #[serde(default = "default_learn_max_retries")]
    pub max_conflict_retries: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            suspend_on_nav_score: default_learn_suspend_on(),
            resume_after_secs: default_learn_resume_after_s(),
            max_conflict_retries: default_learn_max_retries(),
        }
    }
}

fn default_learn_suspend_on() -> f64 {
    0.85
}
fn default_learn_resume_after_s() -> u64 {
    60
}
fn default_learn_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_hot_timeout_ms")]
    pub hot_timeout_ms: u64,
    #[serde(default = "default_cold_timeout_ms")]
    pub cold_timeout_ms: u64,
    #[serde(default = "default_hot_store_retries")]
    pub hot_store_retries: u32,
    #[serde(default = "default_cold_store_path")]
    pub cold_store_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hot_timeout_ms: default_hot_timeout_ms(),
            cold_timeout_ms: default_cold_timeout_ms(),
            hot_store_retries: default_hot_store_retries(),
            cold_store_path: default_cold_store_path(),
        }
    }
}

fn default_hot_timeout_ms() -> u64 {
    200
}
fn default_cold_timeout_ms() -> u64 {
    1_000
}
fn default_hot_store_retries() -> u32 {
    5
}
fn default_cold_store_path() -> PathBuf {
    PathBuf::from("sentinel.sqlite3")
}

/// Per-mode ALLOW/CHALLENGE/BLOCK thresholds on `final_risk` (spec.md
/// §4.10 step 6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeThresholds {
    pub challenge_at: f64,
    pub block_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub normal: ModeThresholds,
    pub challenge: ModeThresholds,
    pub trusted: ModeThresholds,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            normal: ModeThresholds {
                challenge_at: 0.50,
                block_at: 0.85,
            },
            challenge: ModeThresholds {
                challenge_at: 0.40,
                block_at: 0.75,
            },
            trusted: ModeThresholds {
                challenge_at: 0.60,
                block_at: 0.92,
            },
        }
    }
}

/// Fusion weight for one signal across NORMAL/CHALLENGE, plus the TRUSTED
/// scale factor (spec.md §4.10 step 5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalWeight {
    pub normal: f64,
    pub challenge: f64,
    pub trusted_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionWeights {
    pub keyboard: SignalWeight,
    pub mouse: SignalWeight,
    pub navigator: SignalWeight,
    pub identity: SignalWeight,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            keyboard: SignalWeight {
                normal: 0.70,
                challenge: 0.85,
                trusted_factor: 0.8,
            },
            mouse: SignalWeight {
                normal: 0.90,
                challenge: 1.00,
                trusted_factor: 1.0,
            },
            navigator: SignalWeight {
                normal: 1.00,
                challenge: 1.00,
                trusted_factor: 1.0,
            },
            identity: SignalWeight {
                normal: 0.65,
                challenge: 0.85,
                trusted_factor: 0.6,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub keyboard: KeyboardWindowConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub ban: BanConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub weights: FusionWeights,
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub navigator: NavigatorConfig,
}

impl SentinelConfig {
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
