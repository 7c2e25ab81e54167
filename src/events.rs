//! Market event model shared by every stage of the pipeline.
//!
//! Timestamps are integer microseconds. An event is built by a source adapter,
//! moved through the sanitizer and the decision engine, and dropped once its
//! decision has been emitted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field name → scalar value. The schema depends on the event type.
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Trade,
    Orderbook,
    Liquidation,
    Ticker,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Trade => "TRADE",
            EventType::Orderbook => "ORDERBOOK",
            EventType::Liquidation => "LIQUIDATION",
            EventType::Ticker => "TICKER",
        }
    }

    /// Map a historical source name (`trade`, `orderbook`, ...) to its event type.
    pub fn from_source_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TRADE" | "TRADES" => Some(EventType::Trade),
            "ORDERBOOK" => Some(EventType::Orderbook),
            "LIQUIDATION" | "LIQUIDATIONS" => Some(EventType::Liquidation),
            "TICKER" => Some(EventType::Ticker),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sanitization {
    Accept,
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    Duplicate,
    TimestampError,
    FatFinger,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Duplicate => "DUPLICATE",
            RejectReason::TimestampError => "TIMESTAMP_ERROR",
            RejectReason::FatFinger => "FAT_FINGER",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation from the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvent {
    /// Producer-side timestamp (µs).
    pub event_time: i64,
    /// Receipt timestamp (µs).
    pub local_time: i64,
    pub kind: EventType,
    pub payload: Payload,
    sanitization: Sanitization,
    reject_reason: Option<RejectReason>,
}

impl MarketEvent {
    pub fn new(event_time: i64, local_time: i64, kind: EventType, payload: Payload) -> Self {
        Self {
            event_time,
            local_time,
            kind,
            payload,
            sanitization: Sanitization::Accept,
            reject_reason: None,
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn sanitization(&self) -> Sanitization {
        self.sanitization
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        self.reject_reason
    }

    pub fn is_quarantined(&self) -> bool {
        self.sanitization == Sanitization::Quarantine
    }

    pub(crate) fn accept(&mut self) {
        self.sanitization = Sanitization::Accept;
        self.reject_reason = None;
    }

    pub(crate) fn quarantine(&mut self, reason: RejectReason) {
        self.sanitization = Sanitization::Quarantine;
        self.reject_reason = Some(reason);
    }

    /// Numeric view of a payload field (see [`field_f64`]).
    pub fn number(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(field_f64)
    }

    /// String view of a payload field; numbers are not coerced.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Lenient numeric parse of a payload value.
///
/// Numbers pass through, strings are trimmed and parsed, everything else is
/// `None`. A failed parse means "field not applicable", never an error.
pub fn field_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Convert a raw text cell into the closest JSON scalar.
///
/// Empty cells become `null`; integers and floats become numbers; anything
/// else (including non-finite floats) stays a string.
pub fn scalar_from_text(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(trimmed.to_string())
}
