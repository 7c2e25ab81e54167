//! Structured run logging.
//!
//! Every entry is one JSON line carrying a run id, a sequence number, a level
//! and a domain. Entries go to `<LOG_DIR>/<run_id>/events.jsonl` (trace/debug
//! to `trace.jsonl`) and are echoed to stdout.
//!
//! Filtering:
//! - `LOG_LEVEL` (trace|debug|info|warn|error|fatal, default info)
//! - `LOG_DOMAINS` (comma-separated list or `all`)
//! - `LOG_STDOUT=0` silences the stdout echo

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,    // Source files, chunk loads, quotes
    Sanitizer, // Quarantine verdicts
    Regime,    // Volatility/spread model, shocks
    Decision,  // State transitions, blocks
    Feed,      // Websocket connect/reconnect
    System,    // Startup, shutdown, summaries
    Profile,   // Timing scopes
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Sanitizer => "sanitizer",
            Domain::Regime => "regime",
            Domain::Decision => "decision",
            Domain::Feed => "feed",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

type Sink = Option<Mutex<BufWriter<File>>>;

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Sink,
    trace: Sink,
    echo: bool,
}

fn open_sink(path: PathBuf) -> Sink {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            run_id,
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
            echo: std::env::var("LOG_STDOUT").map(|v| v != "0").unwrap_or(true),
        }
    })
}

fn write_line(sink: &Sink, line: &str) {
    if let Some(writer) = sink {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
        }
    }
}

fn flush_sink(sink: &Sink) {
    if let Some(writer) = sink {
        if let Ok(mut w) = writer.lock() {
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Epoch microseconds, the engine's native time unit.
pub fn ts_epoch_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    let ctx = ensure_run_context();
    let mut fields = fields;
    let msg = fields.remove("msg").unwrap_or(Value::String(String::new()));

    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    entry.insert("data".to_string(), Value::Object(fields));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    if ctx.echo {
        println!("{}", line);
    }
}

/// Flush buffered log files. Call before process exit.
pub fn flush() {
    if let Some(ctx) = RUN_CONTEXT.get() {
        flush_sink(&ctx.events);
        flush_sink(&ctx.trace);
    }
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_transition(event_time: i64, from: &str, to: &str, trigger: &str) {
    log(
        Level::Info,
        Domain::Decision,
        "state_transition",
        obj(&[
            ("event_time", json!(event_time)),
            ("from", v_str(from)),
            ("to", v_str(to)),
            ("trigger", v_str(trigger)),
        ]),
    );
}

pub fn log_progress(processed: u64, blocked: u64, state: &str) {
    log(
        Level::Info,
        Domain::System,
        "progress",
        obj(&[
            ("processed", json!(processed)),
            ("blocked", json!(blocked)),
            ("state", v_str(state)),
        ]),
    );
}

pub fn log_block_notice(blocked: u64, reason: &str) {
    log(
        Level::Warn,
        Domain::Decision,
        "blocked",
        obj(&[("blocked", json!(blocked)), ("reason", v_str(reason))]),
    );
}

pub fn log_reconnect(error: &str, delay_secs: u64) {
    log(
        Level::Warn,
        Domain::Feed,
        "reconnect",
        obj(&[("error", v_str(error)), ("delay_secs", json!(delay_secs))]),
    );
}

/// Session summary on shutdown
pub fn log_session_summary(mode: &str, total_events: u64, blocked_events: u64, final_state: &str) {
    log(
        Level::Info,
        Domain::System,
        "session_summary",
        obj(&[
            ("mode", v_str(mode)),
            ("total_events", json!(total_events)),
            ("blocked_events", json!(blocked_events)),
            ("final_state", v_str(final_state)),
        ]),
    );
}

// =============================================================================
// Field helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}
