//! Engine state vocabulary and the per-event decision record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating state of the decision engine. Starts in `Bootstrap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    #[default]
    Bootstrap,
    Normal,
    Unstable,
    Halted,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Bootstrap => "BOOTSTRAP",
            SystemState::Normal => "NORMAL",
            SystemState::Unstable => "UNSTABLE",
            SystemState::Halted => "HALTED",
        }
    }

    /// Admission action implied by the state.
    pub fn action(&self) -> Action {
        match self {
            SystemState::Halted => Action::Halt,
            SystemState::Unstable => Action::Restricted,
            SystemState::Bootstrap => Action::Halt,
            SystemState::Normal => Action::Allowed,
        }
    }

    /// How much the data and the baseline hypothesis are trusted in this state.
    pub fn info(&self) -> (DataTrust, Hypothesis) {
        match self {
            SystemState::Halted => (DataTrust::Untrusted, Hypothesis::Invalid),
            SystemState::Unstable => (DataTrust::Degraded, Hypothesis::Weakening),
            SystemState::Bootstrap => (DataTrust::Degraded, Hypothesis::Gathering),
            SystemState::Normal => (DataTrust::Trusted, Hypothesis::Valid),
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Allowed,
    Restricted,
    Halt,
    Ignored,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allowed => "ALLOWED",
            Action::Restricted => "RESTRICTED",
            Action::Halt => "HALT",
            Action::Ignored => "IGNORED",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataTrust {
    Trusted,
    Degraded,
    Untrusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Hypothesis {
    Valid,
    Gathering,
    Weakening,
    Invalid,
}

/// One admission verdict. Serializes to the decision-log line; `state` and
/// `trigger` are kept for transition logging only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub ts: i64,
    pub action: Action,
    pub reason: String,
    /// Elapsed ms since the current HALT episode began, 0 otherwise.
    pub duration_ms: i64,
    #[serde(skip)]
    pub state: SystemState,
    #[serde(skip)]
    pub trigger: String,
}

impl DecisionRecord {
    pub fn is_allowed(&self) -> bool {
        self.action == Action::Allowed
    }
}
