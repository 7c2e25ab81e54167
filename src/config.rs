//! Engine configuration and the calibration artifact.
//!
//! Built once at startup and handed to each component by reference. Nothing
//! mutates it afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::regime::Baseline;

pub const DEFAULT_DEDUP_CAPACITY: usize = 5_000_000;

/// How shock detection treats missing volatility/spread inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockPolicy {
    /// No distance until the model has a return, a positive spread and
    /// non-negligible volatility. The distance window is left untouched.
    StrictGuard,
    /// Substitute floor values for volatility/spread so a distance is always
    /// recorded, including zero before the first return.
    FloorSubstitute,
}

impl ShockPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" | "strict_guard" => Some(ShockPolicy::StrictGuard),
            "floor" | "floor_substitute" => Some(ShockPolicy::FloorSubstitute),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShockPolicy::StrictGuard => "strict_guard",
            ShockPolicy::FloorSubstitute => "floor_substitute",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Prices at or below this are quarantined as fat-finger.
    pub fat_finger_price: f64,
    /// Feed silence longer than this (ms) halts the engine.
    pub stale_after_ms: f64,
    /// Maximum |event_time - local_time| (ms) before quarantine.
    pub timestamp_tolerance_ms: f64,
    /// Capacity of the rolling distance window.
    pub distance_window: usize,
    /// Capacity of the rolling trade-price window.
    pub price_window: usize,
    pub sigma_multiplier: f64,
    /// Recovery band for UNSTABLE → NORMAL, in standard deviations.
    pub recovery_sigma: f64,
    /// Distance samples required before shocks are judged.
    pub min_history: usize,
    pub dedup_capacity: usize,
    pub shock_policy: ShockPolicy,
    pub baseline: Baseline,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fat_finger_price: 0.0,
            stale_after_ms: 5_000.0,
            timestamp_tolerance_ms: 60_000.0,
            distance_window: 100,
            price_window: 50,
            sigma_multiplier: 3.0,
            recovery_sigma: 1.0,
            min_history: 20,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            shock_policy: ShockPolicy::StrictGuard,
            baseline: Baseline::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables. `policy` is the run
    /// mode's default and can itself be overridden with `SHOCK_POLICY`.
    pub fn from_env(policy: ShockPolicy) -> Self {
        let d = Self::default();
        Self {
            fat_finger_price: std::env::var("FAT_FINGER_PRICE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.fat_finger_price),
            stale_after_ms: std::env::var("STALE_TICKER_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.stale_after_ms),
            timestamp_tolerance_ms: std::env::var("TIMESTAMP_TOLERANCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.timestamp_tolerance_ms),
            distance_window: std::env::var("WINDOW_SIZE").ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(d.distance_window),
            price_window: std::env::var("PRICE_WINDOW").ok().and_then(|v| v.parse().ok()).filter(|n| *n >= 2).unwrap_or(d.price_window),
            sigma_multiplier: std::env::var("SIGMA_MULTIPLIER").ok().and_then(|v| v.parse().ok()).unwrap_or(d.sigma_multiplier),
            recovery_sigma: std::env::var("RECOVERY_SIGMA").ok().and_then(|v| v.parse().ok()).unwrap_or(d.recovery_sigma),
            min_history: std::env::var("MIN_HISTORY").ok().and_then(|v| v.parse().ok()).unwrap_or(d.min_history),
            dedup_capacity: std::env::var("DEDUP_CAPACITY").ok().and_then(|v| v.parse().ok()).unwrap_or(d.dedup_capacity),
            shock_policy: std::env::var("SHOCK_POLICY").ok().and_then(|v| ShockPolicy::parse(&v)).unwrap_or(policy),
            baseline: d.baseline,
        }
    }

    /// Fold a calibration artifact into the config.
    pub fn with_calibration(mut self, cal: &Calibration) -> Self {
        self.baseline = Baseline {
            mu: cal.mu,
            inv_cov: cal.inv_cov,
        };
        if let Some(tol) = cal.timestamp_tolerance_ms {
            self.timestamp_tolerance_ms = tol;
        }
        self
    }

    pub fn with_policy(mut self, policy: ShockPolicy) -> Self {
        self.shock_policy = policy;
        self
    }
}

/// Baseline artifact written by the offline calibration step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub mu: [f64; 2],
    pub inv_cov: [[f64; 2]; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_tolerance_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            mu: [0.0, 0.0],
            inv_cov: [[1.0, 0.0], [0.0, 1.0]],
            timestamp_tolerance_ms: None,
            threshold: Some(3.0),
        }
    }
}

impl Calibration {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read calibration {}", path.display()))?;
        let cal: Calibration = serde_json::from_str(&raw)
            .with_context(|| format!("parse calibration {}", path.display()))?;
        Ok(cal)
    }

    /// Read the artifact, falling back to the identity baseline on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::read(path) {
            Ok(cal) => {
                log(
                    Level::Info,
                    Domain::System,
                    "calibration_loaded",
                    obj(&[
                        ("path", v_str(&path.display().to_string())),
                        ("mu_vol", v_num(cal.mu[0])),
                        ("mu_spread", v_num(cal.mu[1])),
                    ]),
                );
                cal
            }
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::System,
                    "calibration_fallback",
                    obj(&[
                        ("path", v_str(&path.display().to_string())),
                        ("error", v_str(&format!("{:#}", err))),
                    ]),
                );
                Self::default()
            }
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
