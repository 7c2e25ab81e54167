//! Sanitizer behaviour across whole event sequences.

use marketguard::config::EngineConfig;
use marketguard::events::{EventType, MarketEvent, Payload, RejectReason, Sanitization};
use marketguard::sanitizer::Sanitizer;
use serde_json::{json, Value};

fn trade_with_id(ts: i64, id: Value) -> MarketEvent {
    MarketEvent::new(ts, ts, EventType::Trade, Payload::new())
        .with("price", 100.0)
        .with("id", id)
}

#[test]
fn duplicate_detection_ignores_id_spelling() {
    let mut s = Sanitizer::new(&EngineConfig::default());
    let forms = [json!(12345), json!("12345"), json!(12345.0), json!(" 12345.0 ")];
    let verdicts: Vec<Option<RejectReason>> = forms
        .iter()
        .enumerate()
        .map(|(i, id)| s.check(trade_with_id(i as i64, id.clone())).reject_reason())
        .collect();
    assert_eq!(verdicts[0], None);
    assert!(verdicts[1..].iter().all(|v| *v == Some(RejectReason::Duplicate)));
}

#[test]
fn duplicate_detection_is_independent_of_field_order() {
    let mut s = Sanitizer::new(&EngineConfig::default());
    let mut first = Payload::new();
    first.insert("id".into(), json!(9));
    first.insert("price".into(), json!(1.0));
    let mut second = Payload::new();
    second.insert("price".into(), json!(1.0));
    second.insert("id".into(), json!("9"));

    assert!(!s.check(MarketEvent::new(1, 1, EventType::Trade, first)).is_quarantined());
    let dup = s.check(MarketEvent::new(2, 2, EventType::Trade, second));
    assert_eq!(dup.reject_reason(), Some(RejectReason::Duplicate));
}

#[test]
fn ids_are_shared_across_event_kinds() {
    let mut s = Sanitizer::new(&EngineConfig::default());
    s.check(trade_with_id(1, json!("x-1")));
    let liq = MarketEvent::new(2, 2, EventType::Liquidation, Payload::new()).with("id", "x-1");
    assert_eq!(s.check(liq).reject_reason(), Some(RejectReason::Duplicate));
}

#[test]
fn registry_stays_within_capacity() {
    let cfg = EngineConfig {
        dedup_capacity: 8,
        ..EngineConfig::default()
    };
    let mut s = Sanitizer::new(&cfg);
    assert_eq!(s.registry().capacity(), 8);
    for i in 0..100 {
        s.check(trade_with_id(i, json!(i)));
        assert!(s.registry().len() <= 8);
    }
    assert_eq!(s.registry().len(), 8);

    // Evicted ids are forgotten, recent ones are not.
    assert!(!s.check(trade_with_id(200, json!(0))).is_quarantined());
    assert!(s.check(trade_with_id(201, json!(99))).is_quarantined());
}

#[test]
fn rejected_events_still_register_their_id() {
    let mut s = Sanitizer::new(&EngineConfig::default());
    let bad = MarketEvent::new(1, 1, EventType::Trade, Payload::new())
        .with("price", -1.0)
        .with("id", 5);
    assert_eq!(s.check(bad).reject_reason(), Some(RejectReason::FatFinger));
    let retry = trade_with_id(2, json!(5));
    assert_eq!(s.check(retry).reject_reason(), Some(RejectReason::Duplicate));
}

#[test]
fn timestamp_tolerance_boundary() {
    let mut s = Sanitizer::new(&EngineConfig::default());
    let at_limit = MarketEvent::new(0, 60_000_000, EventType::Ticker, Payload::new());
    assert_eq!(s.check(at_limit).sanitization(), Sanitization::Accept);

    let past_limit = MarketEvent::new(60_000_001, 0, EventType::Ticker, Payload::new());
    assert_eq!(s.check(past_limit).reject_reason(), Some(RejectReason::TimestampError));
}

#[test]
fn rule_order_duplicate_before_skew_before_price() {
    let mut s = Sanitizer::new(&EngineConfig::default());
    s.check(trade_with_id(0, json!(1)));

    let everything_wrong = MarketEvent::new(0, 100_000_000, EventType::Trade, Payload::new())
        .with("price", 0.0)
        .with("id", 1);
    assert_eq!(s.check(everything_wrong).reject_reason(), Some(RejectReason::Duplicate));

    let skew_and_price = MarketEvent::new(0, 100_000_000, EventType::Trade, Payload::new()).with("price", 0.0);
    assert_eq!(s.check(skew_and_price).reject_reason(), Some(RejectReason::TimestampError));
}

#[test]
fn unparseable_fields_do_not_reject() {
    let mut s = Sanitizer::new(&EngineConfig::default());
    let odd = MarketEvent::new(5, 5, EventType::Trade, Payload::new())
        .with("price", "n/a")
        .with("id", "nan");
    assert!(!s.check(odd).is_quarantined());
    assert!(s.registry().is_empty());
}
