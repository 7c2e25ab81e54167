//! Adaptive regime model.
//!
//! Tracks an EWMA of absolute log returns and the current bid/ask spread, and
//! measures how far `(ln vol, ln spread)` sits from a calibrated baseline in
//! Mahalanobis units. Shocks are judged against the model's own recent
//! distance history rather than a fixed cutoff.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::{EngineConfig, ShockPolicy};

/// Volatility at or below this is treated as "no information".
pub const VOL_EPSILON: f64 = 1e-9;
/// Spread substituted under [`ShockPolicy::FloorSubstitute`] when no valid spread exists.
pub const SPREAD_FLOOR: f64 = 1e-8;
/// Weight on the prior volatility estimate.
const EWMA_DECAY: f64 = 0.9;

pub const GATHERING_DATA: &str = "GATHERING_DATA";

/// Calibrated reference point for the feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mu: [f64; 2],
    pub inv_cov: [[f64; 2]; 2],
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            mu: [0.0, 0.0],
            inv_cov: [[1.0, 0.0], [0.0, 1.0]],
        }
    }
}

impl Baseline {
    /// `sqrt(max(0, (x-mu)' inv_cov (x-mu)))`
    pub fn mahalanobis(&self, x: [f64; 2]) -> f64 {
        let d = [x[0] - self.mu[0], x[1] - self.mu[1]];
        let m = &self.inv_cov;
        let q = d[0] * (m[0][0] * d[0] + m[0][1] * d[1]) + d[1] * (m[1][0] * d[0] + m[1][1] * d[1]);
        q.max(0.0).sqrt()
    }
}

/// Bounded window of recent distances. Oldest values drop off on overflow.
#[derive(Debug, Clone)]
pub struct DistanceWindow {
    max_size: usize,
    values: VecDeque<f64>,
}

impl DistanceWindow {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            values: VecDeque::with_capacity(max_size.max(1)),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.max_size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Population standard deviation.
    pub fn std(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.values.len() as f64;
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(var.sqrt())
    }

    /// `mean + k * std`, or `None` for an empty window.
    pub fn band(&self, k: f64) -> Option<f64> {
        Some(self.mean()? + k * self.std()?)
    }
}

/// Result of one shock evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ShockReading {
    pub distance: f64,
    pub is_shock: bool,
    /// `""` (no reading), `GATHERING_DATA`, or `Dist:<d>`.
    pub detail: String,
}

impl ShockReading {
    fn silent() -> Self {
        Self {
            distance: 0.0,
            is_shock: false,
            detail: String::new(),
        }
    }
}

/// Best bid/ask as currently known. Zero means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuoteView {
    pub best_bid: f64,
    pub best_ask: f64,
}

impl QuoteView {
    /// True when a quote on `side` at `price` would cross the opposite side.
    pub fn crosses(&self, side: &str, price: f64) -> bool {
        match side {
            "bid" => self.best_ask > 0.0 && price >= self.best_ask,
            "ask" => self.best_bid > 0.0 && price <= self.best_bid,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveRegimeModel {
    prices: VecDeque<f64>,
    price_window: usize,
    volatility: f64,
    quotes: QuoteView,
    spread: f64,
    initialized: bool,
    distances: DistanceWindow,
    baseline: Baseline,
    policy: ShockPolicy,
    sigma_multiplier: f64,
    min_history: usize,
}

impl AdaptiveRegimeModel {
    pub fn new(cfg: &EngineConfig) -> Self {
        let price_window = cfg.price_window.max(2);
        Self {
            prices: VecDeque::with_capacity(price_window),
            price_window,
            volatility: 0.0,
            quotes: QuoteView::default(),
            spread: 0.0,
            initialized: false,
            distances: DistanceWindow::new(cfg.distance_window),
            baseline: cfg.baseline.clone(),
            policy: cfg.shock_policy,
            sigma_multiplier: cfg.sigma_multiplier,
            min_history: cfg.min_history,
        }
    }

    pub fn on_trade(&mut self, price: f64) {
        if !(price.is_finite() && price > 0.0) {
            return;
        }
        if self.prices.len() >= self.price_window {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
        let n = self.prices.len();
        if n >= 2 {
            let ret = (price / self.prices[n - 2]).ln();
            self.volatility = self.volatility * EWMA_DECAY + ret.abs() * (1.0 - EWMA_DECAY);
            self.initialized = true;
        }
    }

    pub fn on_bid(&mut self, bid: f64) {
        if bid.is_finite() && bid > 0.0 {
            self.quotes.best_bid = bid;
        }
        self.refresh_spread();
    }

    pub fn on_ask(&mut self, ask: f64) {
        if ask.is_finite() && ask > 0.0 {
            self.quotes.best_ask = ask;
        }
        self.refresh_spread();
    }

    fn refresh_spread(&mut self) {
        if self.quotes.best_bid > 0.0 && self.quotes.best_ask > 0.0 {
            self.spread = self.quotes.best_ask - self.quotes.best_bid;
        }
    }

    /// Compute the current distance, record it, and judge it against history.
    pub fn detect_shock(&mut self) -> ShockReading {
        let distance = match self.policy {
            ShockPolicy::StrictGuard => {
                if !self.initialized || self.spread <= 0.0 || self.volatility <= VOL_EPSILON {
                    return ShockReading::silent();
                }
                self.baseline.mahalanobis([self.volatility.ln(), self.spread.ln()])
            }
            ShockPolicy::FloorSubstitute => {
                if self.initialized {
                    let vol = if self.volatility > VOL_EPSILON { self.volatility } else { VOL_EPSILON };
                    let spread = if self.spread > 0.0 { self.spread } else { SPREAD_FLOOR };
                    let d = self.baseline.mahalanobis([vol.ln(), spread.ln()]);
                    if d.is_finite() {
                        d
                    } else {
                        0.0
                    }
                } else {
                    0.0
                }
            }
        };

        self.distances.push(distance);

        if self.distances.len() < self.min_history {
            return ShockReading {
                distance,
                is_shock: false,
                detail: GATHERING_DATA.to_string(),
            };
        }

        let threshold = self.distances.band(self.sigma_multiplier).unwrap_or(f64::INFINITY);
        ShockReading {
            distance,
            is_shock: distance > threshold,
            detail: format!("Dist:{:.2}", distance),
        }
    }

    /// Strictly inside the `recovery_sigma` band of the distance window.
    pub fn within_recovery_band(&self, distance: f64, recovery_sigma: f64) -> bool {
        match self.distances.band(recovery_sigma) {
            Some(band) => distance < band,
            None => false,
        }
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn spread(&self) -> f64 {
        self.spread
    }

    pub fn quotes(&self) -> QuoteView {
        self.quotes
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn distances(&self) -> &DistanceWindow {
        &self.distances
    }
}
