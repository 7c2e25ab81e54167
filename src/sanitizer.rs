//! Input sanitizer: duplicate ids, timestamp skew, fat-finger prices.
//!
//! Rules run in order and the first match wins. Malformed fields never
//! reject an event on their own; they just make the rule inapplicable.

use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::events::{field_f64, MarketEvent, RejectReason};

/// Bounded, insertion-ordered set of accepted identifiers.
///
/// The membership set and the eviction queue always hold the same ids, so
/// `len() <= capacity()` holds after every call.
#[derive(Debug, Clone)]
pub struct SeenIdRegistry {
    capacity: usize,
    members: HashSet<Arc<str>>,
    order: VecDeque<Arc<str>>,
}

impl SeenIdRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            members: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Insert `id`; returns `false` if it was already present. Evicts the
    /// oldest ids once the capacity is exceeded.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        let key: Arc<str> = Arc::from(id);
        self.members.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Canonical form of a payload identifier, or `None` if it should be
/// treated as absent.
///
/// Numerically integral ids normalise to their integer string (`"7"`,
/// `7`, `7.0` and `" 7 "` are the same id); anything else keeps its trimmed
/// literal form. A result spelling `nan` counts as absent.
pub fn normalize_id(raw: &Value) -> Option<String> {
    let literal = match raw {
        Value::Null => return None,
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return Some(u.to_string());
            }
            if let Some(i) = n.as_i64() {
                return Some(i.to_string());
            }
            n.to_string()
        }
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };

    let normalized = match field_f64(&Value::String(literal.clone())) {
        Some(f) if f.is_finite() && f.fract() == 0.0 => format!("{:.0}", f),
        _ => literal,
    };

    if normalized.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(normalized)
    }
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    registry: SeenIdRegistry,
    timestamp_tolerance_ms: f64,
    fat_finger_price: f64,
}

impl Sanitizer {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            registry: SeenIdRegistry::new(cfg.dedup_capacity),
            timestamp_tolerance_ms: cfg.timestamp_tolerance_ms,
            fat_finger_price: cfg.fat_finger_price,
        }
    }

    pub fn registry(&self) -> &SeenIdRegistry {
        &self.registry
    }

    /// Classify `event`, setting its sanitization status exactly once.
    pub fn check(&mut self, mut event: MarketEvent) -> MarketEvent {
        match self.verdict(&event) {
            Some(reason) => event.quarantine(reason),
            None => event.accept(),
        }
        event
    }

    fn verdict(&mut self, event: &MarketEvent) -> Option<RejectReason> {
        // 1) Duplicate id. Accepted-or-not, a fresh id is remembered here.
        if let Some(id) = event.payload.get("id").and_then(normalize_id) {
            if !self.registry.insert(&id) {
                return Some(RejectReason::Duplicate);
            }
        }

        // 2) Producer vs receipt clock skew.
        let skew_ms = event.event_time.abs_diff(event.local_time) as f64 / 1000.0;
        if skew_ms > self.timestamp_tolerance_ms {
            return Some(RejectReason::TimestampError);
        }

        // 3) Non-positive (or below-floor) price.
        if let Some(price) = event.number("price") {
            if price <= self.fat_finger_price {
                return Some(RejectReason::FatFinger);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, Payload, Sanitization};
    use serde_json::json;

    fn trade(ts: i64) -> MarketEvent {
        MarketEvent::new(ts, ts, EventType::Trade, Payload::new())
    }

    #[test]
    fn test_normalize_numeric_forms() {
        assert_eq!(normalize_id(&json!(7)), Some("7".to_string()));
        assert_eq!(normalize_id(&json!(7.0)), Some("7".to_string()));
        assert_eq!(normalize_id(&json!("7.0")), Some("7".to_string()));
        assert_eq!(normalize_id(&json!(" 7 ")), Some("7".to_string()));
        assert_eq!(normalize_id(&json!(18446744073709551615u64)), Some("18446744073709551615".to_string()));
    }

    #[test]
    fn test_normalize_keeps_non_integral_literal() {
        assert_eq!(normalize_id(&json!("12.5")), Some("12.5".to_string()));
        assert_eq!(normalize_id(&json!("  abc-1 ")), Some("abc-1".to_string()));
    }

    #[test]
    fn test_normalize_nan_and_null_are_absent() {
        assert_eq!(normalize_id(&json!("nan")), None);
        assert_eq!(normalize_id(&json!(" NaN ")), None);
        assert_eq!(normalize_id(&Value::Null), None);
    }

    #[test]
    fn test_registry_evicts_oldest_first() {
        let mut reg = SeenIdRegistry::new(2);
        assert!(reg.insert("a"));
        assert!(reg.insert("b"));
        assert!(reg.insert("c"));
        assert_eq!(reg.len(), 2);
        assert!(!reg.contains("a"));
        assert!(reg.contains("b"));
        assert!(reg.contains("c"));
    }

    #[test]
    fn test_fat_finger_parse_failure_is_not_rejection() {
        let cfg = EngineConfig::default();
        let mut s = Sanitizer::new(&cfg);
        let ev = s.check(trade(1).with("price", "n/a"));
        assert_eq!(ev.sanitization(), Sanitization::Accept);
        let ev = s.check(trade(2).with("price", "-5"));
        assert_eq!(ev.reject_reason(), Some(RejectReason::FatFinger));
    }

    #[test]
    fn test_duplicate_checked_before_skew() {
        let cfg = EngineConfig::default();
        let mut s = Sanitizer::new(&cfg);
        let first = MarketEvent::new(0, 120_000_000, EventType::Trade, Payload::new()).with("id", 9);
        assert_eq!(s.check(first).reject_reason(), Some(RejectReason::TimestampError));
        let second = trade(5).with("id", "9");
        assert_eq!(s.check(second).reject_reason(), Some(RejectReason::Duplicate));
    }
}
