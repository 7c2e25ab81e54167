//! Live Binance futures stream driver.
//!
//! Combined-stream envelopes `{"stream": ..., "data": {...}}` are decoded into
//! [`MarketEvent`]s and pushed through one long-lived [`Session`]. Connection
//! failures are retried forever with a fixed delay; engine state survives
//! reconnects. A `watch` channel carries the shutdown signal.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde_json::Value;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

use crate::config::EngineConfig;
use crate::engine::logging::{write_summary, AuditLog, RunSummary, SUMMARY_FILE};
use crate::engine::session::Session;
use crate::events::{field_f64, EventType, MarketEvent, Payload};
use crate::logging::{
    log, log_reconnect, log_session_summary, obj, ts_epoch_us, v_str, Domain, Level,
};
use crate::regime::QuoteView;

pub const DEFAULT_WS_URL: &str = "wss://fstream.binance.com/stream?streams=btcusdt@aggTrade/btcusdt@depth5@100ms/btcusdt@forceOrder/btcusdt@bookTicker";
pub const RECONNECT_DELAY_SECS: u64 = 3;
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
pub const BLOCK_NOTICE_EVERY: u64 = 50;

/// Binance millisecond timestamp field → µs. Out-of-range values are unusable.
fn millis_field(data: &Payload, key: &str) -> Option<i64> {
    let ms = match data.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        other => field_f64(other).filter(|f| f.is_finite())? as i64,
    };
    ms.checked_mul(1000)
}

/// Decode one websocket text frame into zero or more events, in the order
/// they must be processed.
///
/// `quotes` is the engine's current best bid/ask; it decides the order of the
/// two synthetic book events produced from a `bookTicker` tick.
pub fn decode_message(text: &str, quotes: QuoteView, now_us: i64) -> Vec<MarketEvent> {
    let Ok(Value::Object(mut envelope)) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };
    let Some(stream) = envelope.get("stream").and_then(Value::as_str).map(str::to_string) else {
        return Vec::new();
    };
    let Some(Value::Object(mut data)) = envelope.remove("data") else {
        return Vec::new();
    };

    if stream.contains("aggTrade") {
        let Some(ts) = millis_field(&data, "T") else {
            return Vec::new();
        };
        let price = data.get("p").cloned().unwrap_or(Value::Null);
        let id = data.get("a").cloned().unwrap_or(Value::Null);
        data.insert("price".to_string(), price);
        data.insert("id".to_string(), id);
        vec![MarketEvent::new(ts, now_us, EventType::Trade, data)]
    } else if stream.contains("depth") {
        let Some(ts) = millis_field(&data, "E") else {
            return Vec::new();
        };
        let bids = data.get("b").cloned().unwrap_or(Value::Null);
        let asks = data.get("a").cloned().unwrap_or(Value::Null);
        data.insert("bids".to_string(), bids);
        data.insert("asks".to_string(), asks);
        vec![MarketEvent::new(ts, now_us, EventType::Orderbook, data)]
    } else if stream.contains("forceOrder") {
        let Some(ts) = millis_field(&data, "E") else {
            return Vec::new();
        };
        vec![MarketEvent::new(ts, now_us, EventType::Liquidation, data)]
    } else if stream.contains("bookTicker") {
        let bid = data.get("b").and_then(field_f64).filter(|v| v.is_finite());
        let ask = data.get("a").and_then(field_f64).filter(|v| v.is_finite());
        let (Some(new_bid), Some(new_ask), Some(ts)) = (bid, ask, millis_field(&data, "E")) else {
            return Vec::new();
        };
        let quote = |side: &str, price: f64| {
            MarketEvent::new(ts, now_us, EventType::Orderbook, Payload::new())
                .with("side", side)
                .with("price", price)
        };
        let ev_ask = quote("ask", new_ask);
        let ev_bid = quote("bid", new_bid);

        if quotes.best_ask > 0.0 && new_bid >= quotes.best_ask {
            vec![ev_ask, ev_bid]
        } else if quotes.best_bid > 0.0 && new_ask <= quotes.best_bid {
            vec![ev_bid, ev_ask]
        } else {
            vec![ev_ask, ev_bid]
        }
    } else {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub url: String,
    pub output_dir: PathBuf,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl LiveOptions {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            output_dir,
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }
}

enum StreamEnd {
    Closed,
    Shutdown,
}

type LiveSession = Session<BufWriter<File>>;

fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

fn handle_text(session: &mut LiveSession, text: &str) {
    for event in decode_message(text, session.quotes(), ts_epoch_us()) {
        if let Err(err) = session.handle(event) {
            log(
                Level::Error,
                Domain::Decision,
                "audit_write_failed",
                obj(&[("error", v_str(&format!("{:#}", err)))]),
            );
        }
    }
}

async fn stream_once(
    opts: &LiveOptions,
    session: &mut LiveSession,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<StreamEnd> {
    let url = opts.url.as_str();
    let connect = timeout(opts.connect_timeout, tokio_tungstenite::connect_async(url));
    tokio::pin!(connect);
    let (ws, _) = loop {
        tokio::select! {
            res = &mut connect => {
                let res = res.with_context(|| format!("connect {} timed out", url))?;
                break res.with_context(|| format!("connect {}", url))?;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || is_shutdown(shutdown) {
                    return Ok(StreamEnd::Shutdown);
                }
            }
        }
    };
    log(Level::Info, Domain::Feed, "connected", obj(&[("url", v_str(url))]));
    let (_write, mut read) = ws.split();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || is_shutdown(shutdown) {
                    return Ok(StreamEnd::Shutdown);
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return Ok(StreamEnd::Closed),
                    Some(Ok(msg)) => {
                        if let Ok(text) = msg.into_text() {
                            handle_text(session, &text);
                        }
                    }
                    Some(Err(err)) => return Err(err).context("websocket read"),
                }
            }
        }
    }
}

/// Run until the shutdown flag flips, then flush logs and persist the summary.
pub async fn run(
    cfg: &EngineConfig,
    opts: LiveOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    url::Url::parse(&opts.url).with_context(|| format!("invalid websocket url {}", opts.url))?;
    let audit = AuditLog::open(&opts.output_dir, true)?;
    let mut session = Session::new(cfg, audit).with_block_notices(BLOCK_NOTICE_EVERY);
    let started = chrono::Utc::now().timestamp();

    log(
        Level::Info,
        Domain::System,
        "realtime_start",
        obj(&[
            ("url", v_str(&opts.url)),
            ("output_dir", v_str(&opts.output_dir.display().to_string())),
            ("shock_policy", v_str(cfg.shock_policy.as_str())),
        ]),
    );

    while !is_shutdown(&shutdown) {
        let reason = match stream_once(&opts, &mut session, &mut shutdown).await {
            Ok(StreamEnd::Shutdown) => break,
            Ok(StreamEnd::Closed) => "connection closed".to_string(),
            Err(err) => format!("{:#}", err),
        };
        log_reconnect(&reason, opts.reconnect_delay.as_secs());
        tokio::select! {
            _ = sleep(opts.reconnect_delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    session.flush()?;
    let now = chrono::Utc::now().timestamp();
    let summary = RunSummary {
        timestamp: Some(now),
        duration_sec: Some(now - started),
        ..session.summary()
    };
    write_summary(&opts.output_dir.join(SUMMARY_FILE), &summary)?;
    log_session_summary(
        "realtime",
        summary.total_events,
        summary.blocked_events,
        summary.final_state.as_str(),
    );
    Ok(summary)
}
