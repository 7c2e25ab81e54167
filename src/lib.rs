//! Market-data integrity and circuit-breaker engine.
//!
//! Sanitizes a stream of market events, tracks a volatility/spread regime,
//! and emits an admission decision (allow / restrict / halt / ignore) per
//! event, from historical CSV replay or a live Binance stream.

pub mod calibrate;
pub mod config;
pub mod data;
pub mod engine;
pub mod events;
pub mod feed;
pub mod liveness;
pub mod logging;
pub mod regime;
pub mod replay;
pub mod sanitizer;
