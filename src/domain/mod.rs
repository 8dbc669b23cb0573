//! Core domain types and logic.

pub mod ohlcv;
pub mod indicator;
pub mod score;
pub mod retry;
pub mod regime;
pub mod snapshot;
pub mod lookahead;
pub mod position;
pub mod backtest;
pub mod metrics;
pub mod config_validation;
pub mod error;
