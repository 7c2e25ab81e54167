//! End-to-end decision-engine scenarios.
//!
//! Timestamps are microseconds; each helper event is received the instant it
//! is produced unless a test says otherwise.

use marketguard::config::{EngineConfig, ShockPolicy};
use marketguard::engine::{Action, DecisionEngine, DecisionRecord, SystemState};
use marketguard::events::{EventType, MarketEvent, Payload};
use marketguard::regime::Baseline;

struct Clock(i64);

impl Clock {
    fn tick(&mut self) -> i64 {
        self.0 += 1_000;
        self.0
    }
}

fn trade(ts: i64, price: f64) -> MarketEvent {
    MarketEvent::new(ts, ts, EventType::Trade, Payload::new()).with("price", price)
}

fn quote(ts: i64, side: &str, price: f64) -> MarketEvent {
    MarketEvent::new(ts, ts, EventType::Orderbook, Payload::new())
        .with("side", side)
        .with("price", price)
}

/// Baseline sitting on the quiet regime used below: vol ≈ 1e-3, spread 0.02.
fn calibrated() -> EngineConfig {
    EngineConfig {
        baseline: Baseline {
            mu: [0.001f64.ln(), 0.02f64.ln()],
            inv_cov: [[1.0, 0.0], [0.0, 1.0]],
        },
        ..EngineConfig::default()
    }
}

fn warm_up(engine: &mut DecisionEngine, clock: &mut Clock) -> DecisionRecord {
    engine.process_event(quote(clock.tick(), "bid", 99.99));
    engine.process_event(quote(clock.tick(), "ask", 100.01));
    let mut last = None;
    for i in 0..40 {
        let p = if i % 2 == 0 { 100.0 } else { 100.1 };
        last = Some(engine.process_event(trade(clock.tick(), p)));
    }
    last.expect("forty trades processed")
}

#[test]
fn bootstrap_graduates_on_twenty_first_distance() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    let mut clock = Clock(1_000_000);

    engine.process_event(quote(clock.tick(), "bid", 99.0));
    engine.process_event(quote(clock.tick(), "ask", 101.0));
    let first = engine.process_event(trade(clock.tick(), 100.0));
    assert_eq!(first.state, SystemState::Bootstrap);
    assert_eq!(engine.model().distances().len(), 0);

    for i in 1..=24 {
        let p = if i % 2 == 1 { 100.5 } else { 100.0 };
        let rec = engine.process_event(trade(clock.tick(), p));
        assert_eq!(engine.model().distances().len(), i);
        if i <= 20 {
            assert_eq!(rec.state, SystemState::Bootstrap, "event {}", i);
            assert_eq!(rec.action, Action::Halt);
        } else {
            assert_eq!(rec.state, SystemState::Normal, "event {}", i);
            assert_eq!(rec.action, Action::Allowed);
            assert_eq!(rec.duration_ms, 0);
        }
    }
}

#[test]
fn bootstrap_halt_duration_spans_whole_episode() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    let mut clock = Clock(1_000_000);
    let mut durations = Vec::new();
    for _ in 0..4 {
        durations.push(engine.process_event(trade(clock.tick(), 100.0)).duration_ms);
    }
    assert_eq!(durations, vec![0, 1, 2, 3]);
}

#[test]
fn shock_enters_unstable_and_recovers_with_hysteresis() {
    let mut engine = DecisionEngine::new(&calibrated());
    let mut clock = Clock(1_000_000);

    let quiet = warm_up(&mut engine, &mut clock);
    assert_eq!(quiet.state, SystemState::Normal);

    assert_eq!(engine.process_event(trade(clock.tick(), 100.0)).action, Action::Allowed);
    assert_eq!(engine.process_event(trade(clock.tick(), 100.0)).action, Action::Allowed);

    let crash = engine.process_event(trade(clock.tick(), 50.0));
    assert_eq!(crash.state, SystemState::Unstable);
    assert_eq!(crash.action, Action::Restricted);
    assert!(crash.reason.starts_with("ADAPTIVE_SHOCK (Dist:"), "{}", crash.reason);

    let after = engine.process_event(trade(clock.tick(), 50.0));
    assert_eq!(after.state, SystemState::Unstable, "no recovery right after a shock");

    let mut recovered_at = None;
    for i in 1..25 {
        let p = if i % 2 == 0 { 50.0 } else { 50.15 };
        let rec = engine.process_event(trade(clock.tick(), p));
        if rec.state == SystemState::Normal {
            recovered_at = Some(i);
            assert_eq!(rec.action, Action::Allowed);
            break;
        }
        assert_eq!(rec.action, Action::Restricted);
    }
    let i = recovered_at.expect("settles back to NORMAL");
    assert!(i > 1);
}

#[test]
fn stale_feed_halts_then_recovers() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    engine.process_event(trade(1_000_000, 100.0));

    let stale = engine.process_event(trade(6_000_001, 100.0));
    assert_eq!(stale.action, Action::Halt);
    assert_eq!(stale.state, SystemState::Halted);
    assert_eq!(stale.reason, "DATA_STALE");
    assert_eq!(stale.duration_ms, 5_000);

    let back = engine.process_event(trade(6_000_002, 100.0));
    assert_eq!(back.state, SystemState::Normal);
    assert_eq!(back.action, Action::Allowed);
    assert_eq!(back.reason, "RECOVERED");
    assert_eq!(back.duration_ms, 0);
}

#[test]
fn stale_threshold_is_exclusive() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    engine.process_event(trade(1_000_000, 100.0));
    let rec = engine.process_event(trade(6_000_000, 100.0));
    assert_ne!(rec.reason, "DATA_STALE");
}

#[test]
fn quarantine_then_recovery() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    engine.process_event(trade(1_000, 100.0));
    let bad = engine.process_event(trade(2_000, -5.0));
    assert_eq!(bad.action, Action::Halt);
    assert_eq!(bad.reason, "QUARANTINE: FAT_FINGER");
    assert_eq!(bad.state, SystemState::Halted);

    let next = engine.process_event(trade(3_000, 100.0));
    assert_eq!(next.reason, "RECOVERED");
    assert_eq!(next.state, SystemState::Normal);
}

#[test]
fn duplicate_and_skewed_events_are_quarantined() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    engine.process_event(trade(1_000, 100.0).with("id", 77));
    let dup = engine.process_event(trade(2_000, 100.0).with("id", "77.0"));
    assert_eq!(dup.reason, "QUARANTINE: DUPLICATE");
    assert_eq!(engine.sanitizer().registry().len(), 1);

    let skewed = MarketEvent::new(0, 60_000_001, EventType::Trade, Payload::new()).with("price", 1.0);
    assert_eq!(engine.process_event(skewed).reason, "QUARANTINE: TIMESTAMP_ERROR");
}

#[test]
fn crossed_quotes_are_ignored_both_ways() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    engine.process_event(quote(1_000, "ask", 100.0));
    let crossed_bid = engine.process_event(quote(2_000, "bid", 101.0));
    assert_eq!(crossed_bid.action, Action::Ignored);
    assert_eq!(crossed_bid.reason, "CROSSED_MARKET");

    engine.process_event(quote(3_000, "bid", 99.0));
    let crossed_ask = engine.process_event(quote(4_000, "ask", 99.0));
    assert_eq!(crossed_ask.action, Action::Ignored);
    assert_eq!(engine.quotes().best_ask, 100.0);
}

#[test]
fn liquidations_and_tickers_only_advance_the_clock() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    let liq = MarketEvent::new(1_000, 1_000, EventType::Liquidation, Payload::new()).with("qty", 3.0);
    let rec = engine.process_event(liq);
    assert_eq!(rec.action, Action::Halt);

    let tick = MarketEvent::new(2_000, 2_000, EventType::Ticker, Payload::new()).with("price", 100.0);
    engine.process_event(tick);
    assert!(!engine.model().is_initialized());
    assert_eq!(engine.quotes().best_bid, 0.0);
    assert_eq!(engine.liveness().last_observed(), Some(2_000));
}

#[test]
fn floor_policy_graduates_without_quotes() {
    let cfg = EngineConfig::default().with_policy(ShockPolicy::FloorSubstitute);
    let mut engine = DecisionEngine::new(&cfg);
    let mut clock = Clock(1_000_000);
    let mut states = Vec::new();
    for i in 0..22 {
        let p = if i % 2 == 1 { 100.5 } else { 100.0 };
        states.push(engine.process_event(trade(clock.tick(), p)).state);
    }
    assert!(states[..20].iter().all(|s| *s == SystemState::Bootstrap));
    assert_eq!(states[20], SystemState::Normal);
    assert_eq!(engine.model().distances().len(), 22);
}

#[test]
fn strict_policy_never_graduates_without_quotes() {
    let mut engine = DecisionEngine::new(&EngineConfig::default());
    let mut clock = Clock(1_000_000);
    for i in 0..22 {
        let p = if i % 2 == 1 { 100.5 } else { 100.0 };
        engine.process_event(trade(clock.tick(), p));
    }
    assert_eq!(engine.state(), SystemState::Bootstrap);
    assert!(engine.model().distances().is_empty());
}
