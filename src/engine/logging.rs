//! Audit trail: decision log, transition log, run summary.
//!
//! Two JSON-lines streams per run:
//! - **decisions.jsonl**: one line per non-ALLOWED decision
//! - **state_transitions.jsonl**: one line per state change
//!
//! Replay truncates both files; live mode appends and flushes every line so a
//! crash loses nothing already decided.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use super::state::{Action, DataTrust, DecisionRecord, Hypothesis, SystemState};

pub const DECISIONS_FILE: &str = "decisions.jsonl";
pub const TRANSITIONS_FILE: &str = "state_transitions.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub ts: i64,
    pub data_trust: DataTrust,
    pub hypothesis: Hypothesis,
    pub decision: Action,
    pub trigger: String,
}

impl TransitionRecord {
    pub fn from_decision(rec: &DecisionRecord) -> Self {
        let (data_trust, hypothesis) = rec.state.info();
        Self {
            ts: rec.ts,
            data_trust,
            hypothesis,
            decision: rec.action,
            trigger: rec.trigger.clone(),
        }
    }
}

/// Final run summary. Live runs also carry wall-clock fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<i64>,
    pub total_events: u64,
    pub blocked_events: u64,
    pub final_state: SystemState,
}

/// Write any serializable summary as pretty JSON.
pub fn write_summary<T: Serialize>(path: &Path, summary: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(summary).context("serialize summary")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub struct AuditLog<W: Write> {
    decisions: W,
    transitions: W,
    flush_each: bool,
}

impl AuditLog<BufWriter<File>> {
    /// Open both logs under `dir`, truncating (replay) or appending (live).
    pub fn open(dir: &Path, append: bool) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let open = |name: &str| -> Result<BufWriter<File>> {
            let path = dir.join(name);
            let mut opts = OpenOptions::new();
            opts.create(true);
            if append {
                opts.append(true);
            } else {
                opts.write(true).truncate(true);
            }
            let file = opts.open(&path).with_context(|| format!("open {}", path.display()))?;
            Ok(BufWriter::new(file))
        };
        Ok(Self {
            decisions: open(DECISIONS_FILE)?,
            transitions: open(TRANSITIONS_FILE)?,
            flush_each: append,
        })
    }
}

impl<W: Write> AuditLog<W> {
    pub fn new(decisions: W, transitions: W, flush_each: bool) -> Self {
        Self {
            decisions,
            transitions,
            flush_each,
        }
    }

    pub fn record_decision(&mut self, rec: &DecisionRecord) -> Result<()> {
        let line = serde_json::to_string(rec)?;
        writeln!(self.decisions, "{}", line)?;
        if self.flush_each {
            self.decisions.flush()?;
        }
        Ok(())
    }

    pub fn record_transition(&mut self, rec: &TransitionRecord) -> Result<()> {
        let line = serde_json::to_string(rec)?;
        writeln!(self.transitions, "{}", line)?;
        if self.flush_each {
            self.transitions.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.decisions.flush()?;
        self.transitions.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> (W, W) {
        (self.decisions, self.transitions)
    }
}
