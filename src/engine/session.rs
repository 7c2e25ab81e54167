//! One run of the engine: the decision core plus its counters and sinks.
//!
//! Replay and live drivers both push events through a `Session`, which
//! persists decisions, records transitions, and emits periodic notices.

use anyhow::Result;
use std::io::Write;

use crate::config::EngineConfig;
use crate::events::MarketEvent;
use crate::logging::{log_block_notice, log_progress, log_transition};
use crate::regime::QuoteView;

use super::logging::{AuditLog, RunSummary, TransitionRecord};
use super::reducer::DecisionEngine;
use super::state::{DecisionRecord, SystemState};

pub struct Session<W: Write> {
    engine: DecisionEngine,
    audit: AuditLog<W>,
    processed: u64,
    blocked: u64,
    last_state: SystemState,
    progress_every: Option<u64>,
    block_notice_every: Option<u64>,
}

impl<W: Write> Session<W> {
    pub fn new(cfg: &EngineConfig, audit: AuditLog<W>) -> Self {
        Self {
            engine: DecisionEngine::new(cfg),
            audit,
            processed: 0,
            blocked: 0,
            last_state: SystemState::Bootstrap,
            progress_every: None,
            block_notice_every: None,
        }
    }

    /// Log a progress line every `n` processed events.
    pub fn with_progress_every(mut self, n: u64) -> Self {
        self.progress_every = Some(n).filter(|n| *n > 0);
        self
    }

    /// Log a block notice every `n` blocked events.
    pub fn with_block_notices(mut self, n: u64) -> Self {
        self.block_notice_every = Some(n).filter(|n| *n > 0);
        self
    }

    pub fn handle(&mut self, event: MarketEvent) -> Result<DecisionRecord> {
        let rec = self.engine.process_event(event);
        self.processed += 1;

        if !rec.is_allowed() {
            self.blocked += 1;
            self.audit.record_decision(&rec)?;
            if let Some(every) = self.block_notice_every {
                if self.blocked % every == 0 {
                    let reason = if rec.reason.is_empty() { "GATHERING_DATA" } else { rec.reason.as_str() };
                    log_block_notice(self.blocked, reason);
                }
            }
        }

        if rec.state != self.last_state {
            self.audit.record_transition(&TransitionRecord::from_decision(&rec))?;
            log_transition(rec.ts, self.last_state.as_str(), rec.state.as_str(), &rec.trigger);
            self.last_state = rec.state;
        }

        if let Some(every) = self.progress_every {
            if self.processed % every == 0 {
                log_progress(self.processed, self.blocked, self.last_state.as_str());
            }
        }

        Ok(rec)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            timestamp: None,
            duration_sec: None,
            total_events: self.processed,
            blocked_events: self.blocked,
            final_state: self.last_state,
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.audit.flush()
    }

    pub fn quotes(&self) -> QuoteView {
        self.engine.quotes()
    }

    pub fn into_audit(self) -> AuditLog<W> {
        self.audit
    }
}
