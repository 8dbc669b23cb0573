//! Aggregate statistics over a backtest's closed trades.

use super::position::{ExitReason, Trade};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weekly snapshot cadence.
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 52.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub win_rate: f64,
    pub avg_return: f64,
    pub sharpe_ratio: f64,
    /// Infinite when there are winning trades and no losers.
    pub profit_factor: f64,
    /// Averages over `benchmark_trades` only, the trades whose holding
    /// window the benchmark series covers.
    pub avg_benchmark_return: Option<f64>,
    pub benchmark_delta: Option<f64>,
    pub benchmark_trades: usize,
    pub avg_hold_days: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub exit_reasons: BTreeMap<ExitReason, usize>,
}

impl RunMetrics {
    /// `benchmark_returns[i]` is the passive benchmark's return over
    /// `trades[i]`'s holding window, `None` where the series has no cover.
    /// Pass an empty slice when no benchmark is configured.
    pub fn compute(
        trades: &[Trade],
        benchmark_returns: &[Option<f64>],
        periods_per_year: f64,
    ) -> Self {
        let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
        let total_trades = trades.len();

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut gross_wins = 0.0_f64;
        let mut gross_losses = 0.0_f64;
        let mut exit_reasons = BTreeMap::new();
        let mut total_hold = 0usize;

        for trade in trades {
            let r = trade.return_pct;
            if r > 0.0 {
                trades_won += 1;
                gross_wins += r;
            } else if r < 0.0 {
                trades_lost += 1;
                gross_losses += r.abs();
            }
            *exit_reasons.entry(trade.exit_reason).or_insert(0) += 1;
            total_hold += trade.hold_days;
        }

        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let avg_return = mean(&returns).unwrap_or(0.0);

        let profit_factor = if gross_losses > 0.0 {
            gross_wins / gross_losses
        } else if gross_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let (paired_bench, paired_excess): (Vec<f64>, Vec<f64>) = trades
            .iter()
            .zip(benchmark_returns)
            .filter_map(|(t, b)| b.map(|b| (b, t.return_pct - b)))
            .unzip();
        let avg_benchmark_return = mean(&paired_bench);
        let benchmark_delta = mean(&paired_excess);

        let avg_hold_days = if total_trades > 0 {
            total_hold as f64 / total_trades as f64
        } else {
            0.0
        };

        RunMetrics {
            total_trades,
            trades_won,
            trades_lost,
            win_rate,
            avg_return,
            sharpe_ratio: sharpe(&returns, periods_per_year),
            profit_factor,
            avg_benchmark_return,
            benchmark_delta,
            benchmark_trades: paired_bench.len(),
            avg_hold_days,
            best_trade: returns.iter().copied().reduce(f64::max).unwrap_or(0.0),
            worst_trade: returns.iter().copied().reduce(f64::min).unwrap_or(0.0),
            exit_reasons,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean over population standard deviation, scaled by the square root of the
/// snapshot cadence.
fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let m = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev > 0.0 {
        m / stddev * periods_per_year.sqrt()
    } else {
        0.0
    }
}

/// Per-ticker breakdown of a run's trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerResult {
    pub ticker: String,
    pub total_trades: usize,
    pub trades_won: usize,
    pub win_rate: f64,
    pub avg_return: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

impl TickerResult {
    pub fn compute_per_ticker(trades: &[Trade]) -> Vec<TickerResult> {
        let mut by_ticker: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for trade in trades {
            by_ticker
                .entry(trade.ticker.as_str())
                .or_default()
                .push(trade.return_pct);
        }

        by_ticker
            .into_iter()
            .map(|(ticker, returns)| {
                let total = returns.len();
                let won = returns.iter().filter(|r| **r > 0.0).count();
                TickerResult {
                    ticker: ticker.to_string(),
                    total_trades: total,
                    trades_won: won,
                    win_rate: won as f64 / total as f64,
                    avg_return: mean(&returns).unwrap_or(0.0),
                    best_trade: returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    worst_trade: returns.iter().copied().fold(f64::INFINITY, f64::min),
                }
            })
            .collect()
    }
}
