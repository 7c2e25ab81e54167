//! Per-event state machine: (engine, event) -> decision.
//!
//! Steps, in order:
//!
//! | # | Step | Outcome |
//! |---|------|---------|
//! | 1 | sanitize | quarantine → HALTED, `QUARANTINE: <reason>` |
//! | 2 | crossed-market pre-check | IGNORED, `CROSSED_MARKET` |
//! | 3 | staleness, then advance liveness clock | |
//! | 4 | feed trade / quote into the regime model | |
//! | 5 | stale → HALTED; else recover, detect shock, hysteresis | |
//! | 6 | bootstrap graduation | NORMAL once history is deep enough |
//! | 7 | map state to action, track halt episode | |
//!
//! No I/O happens here. Drivers own logging and persistence.

use crate::config::EngineConfig;
use crate::events::{EventType, MarketEvent};
use crate::liveness::LivenessTracker;
use crate::regime::{AdaptiveRegimeModel, QuoteView};
use crate::sanitizer::Sanitizer;

use super::state::{Action, DecisionRecord, SystemState};

pub const TRIGGER_STALE: &str = "DATA_STALE";
pub const TRIGGER_RECOVERED: &str = "RECOVERED";
pub const TRIGGER_CROSSED: &str = "CROSSED_MARKET";

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    sanitizer: Sanitizer,
    liveness: LivenessTracker,
    model: AdaptiveRegimeModel,
    state: SystemState,
    /// Event time of the first HALT in the current episode.
    halt_start: Option<i64>,
    recovery_sigma: f64,
    graduate_after: usize,
}

impl DecisionEngine {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            sanitizer: Sanitizer::new(cfg),
            liveness: LivenessTracker::new(cfg.stale_after_ms),
            model: AdaptiveRegimeModel::new(cfg),
            state: SystemState::Bootstrap,
            halt_start: None,
            recovery_sigma: cfg.recovery_sigma,
            graduate_after: cfg.min_history,
        }
    }

    pub fn process_event(&mut self, event: MarketEvent) -> DecisionRecord {
        let event = self.sanitizer.check(event);

        if let Some(reason) = event.reject_reason() {
            self.state = SystemState::Halted;
            return self.decide(event.event_time, Action::Halt, format!("QUARANTINE: {}", reason));
        }

        if event.kind == EventType::Orderbook {
            if let (Some(price), Some(side)) = (event.number("price"), event.text("side")) {
                if self.model.quotes().crosses(side, price) {
                    return self.decide(event.event_time, Action::Ignored, TRIGGER_CROSSED.to_string());
                }
            }
        }

        let stale = self.liveness.is_stale(event.local_time);
        self.liveness.update(event.local_time);

        match event.kind {
            EventType::Trade => {
                if let Some(price) = event.number("price") {
                    self.model.on_trade(price);
                }
            }
            EventType::Orderbook => match (event.text("side"), event.number("price")) {
                (Some("bid"), Some(price)) => self.model.on_bid(price),
                (Some("ask"), Some(price)) => self.model.on_ask(price),
                _ => {}
            },
            EventType::Liquidation | EventType::Ticker => {}
        }

        let mut trigger = String::new();
        if stale {
            self.state = SystemState::Halted;
            trigger = TRIGGER_STALE.to_string();
        } else {
            if self.state == SystemState::Halted {
                self.state = SystemState::Normal;
                trigger = TRIGGER_RECOVERED.to_string();
            }

            let reading = self.model.detect_shock();
            if reading.is_shock {
                self.state = SystemState::Unstable;
                trigger = format!("ADAPTIVE_SHOCK ({})", reading.detail);
            } else if self.state == SystemState::Unstable
                && self.model.within_recovery_band(reading.distance, self.recovery_sigma)
            {
                self.state = SystemState::Normal;
            }
        }

        if self.state == SystemState::Bootstrap && self.model.distances().len() > self.graduate_after {
            self.state = SystemState::Normal;
        }

        let action = self.state.action();
        self.decide(event.event_time, action, trigger)
    }

    fn decide(&mut self, ts: i64, action: Action, trigger: String) -> DecisionRecord {
        let duration_ms = if action == Action::Halt {
            let start = *self.halt_start.get_or_insert(ts);
            ts.saturating_sub(start) / 1000
        } else {
            self.halt_start = None;
            0
        };

        DecisionRecord {
            ts,
            action,
            reason: trigger.clone(),
            duration_ms,
            state: self.state,
            trigger,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn quotes(&self) -> QuoteView {
        self.model.quotes()
    }

    pub fn model(&self) -> &AdaptiveRegimeModel {
        &self.model
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }
}
