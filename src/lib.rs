//! ranktrader: point-in-time multi-factor ranking and look-ahead-safe backtesting.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], and a thin command-line adapter in
//! [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
