//! Decision core.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Mux / Live   │────►│  Sanitizer   │────►│   Reducer    │
//! │   decoder    │     │ (dedup/skew) │     │ (state mach) │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                      ┌──────────────┐            │
//!                      │ Regime model │◄───────────┤
//!                      │  + liveness  │            ▼
//!                      └──────────────┘     ┌──────────────┐
//!                                           │   Session    │
//!                                           │ (audit logs) │
//!                                           └──────────────┘
//! ```
//!
//! One engine instance tracks one instrument and is driven by exactly one
//! caller at a time.

pub mod logging;
pub mod reducer;
pub mod session;
pub mod state;

pub use reducer::DecisionEngine;
pub use session::Session;
pub use state::{Action, DataTrust, DecisionRecord, Hypothesis, SystemState};
