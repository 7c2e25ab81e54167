//! Live market-data transports.

pub mod binance_live;
