//! Backtest simulation over a series of point-in-time snapshots.
//!
//! Every (entry date, snapshot) step is validated against look-ahead before
//! any position opens from it. Entries are grouped per ticker and each ticker
//! is simulated independently on the rayon pool; aggregation runs once after
//! every ticker has finished.

use crate::domain::error::RanktraderError;
use crate::domain::indicator::sma::calculate_sma;
use crate::domain::indicator::IndicatorSeries;
use crate::domain::lookahead;
use crate::domain::metrics::{RunMetrics, TickerResult, DEFAULT_PERIODS_PER_YEAR};
use crate::domain::ohlcv::{close_on_or_before, OhlcvBar};
use crate::domain::position::{ExitRules, OpenPosition, Trade};
use crate::domain::regime::RegimeLabel;
use crate::domain::snapshot::Snapshot;
use crate::ports::data_port::PriceDataPort;
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    /// Minimum composite score for an entry.
    pub entry_threshold: f64,
    pub exit_rules: ExitRules,
    /// Skip entries from snapshots taken in a CORRECTION regime.
    pub regime_filter: bool,
    pub periods_per_year: f64,
    /// Passive benchmark for the delta metric.
    pub benchmark: Option<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            entry_threshold: 65.0,
            exit_rules: ExitRules::default(),
            regime_filter: false,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            benchmark: Some("SPY".to_string()),
        }
    }
}

/// One decision point: entries are taken from `snapshot` on `entry_date`.
#[derive(Debug, Clone, Copy)]
pub struct SimulationStep<'a> {
    pub entry_date: NaiveDate,
    pub snapshot: &'a Snapshot,
}

/// Steps that enter on each snapshot's own date.
pub fn steps_from_snapshots(snapshots: &[Snapshot]) -> Vec<SimulationStep<'_>> {
    snapshots
        .iter()
        .map(|snapshot| SimulationStep {
            entry_date: snapshot.data_as_of_date(),
            snapshot,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedTicker {
    pub ticker: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub snapshot_dates: Vec<NaiveDate>,
    pub trades: Vec<Trade>,
    pub metrics: RunMetrics,
    pub ticker_results: Vec<TickerResult>,
    pub skipped: Vec<SkippedTicker>,
    /// Still open when price data ran out; excluded from the metrics.
    pub open_at_end: Vec<OpenPosition>,
    pub validation_warnings: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
    decision_date: NaiveDate,
    snapshot_date: NaiveDate,
    composite_score: f64,
}

#[derive(Debug, Default)]
struct TickerSimulation {
    trades: Vec<Trade>,
    open: Vec<OpenPosition>,
    skipped: Option<SkippedTicker>,
}

pub fn run_backtest(
    steps: &[SimulationStep<'_>],
    prices: &(dyn PriceDataPort + Sync),
    config: &BacktestConfig,
) -> Result<BacktestRun, RanktraderError> {
    let mut ordered: Vec<SimulationStep<'_>> = steps.to_vec();
    ordered.sort_by_key(|s| (s.entry_date, s.snapshot.data_as_of_date()));

    let mut validation_warnings = 0usize;
    for step in &ordered {
        match lookahead::validate(step.snapshot, step.entry_date) {
            Ok(report) => validation_warnings += report.warnings.len(),
            Err(e) => {
                warn!(
                    entry_date = %step.entry_date,
                    snapshot = %step.snapshot.data_as_of_date(),
                    count = e.count,
                    "look-ahead contamination, aborting run"
                );
                return Err(e.into());
            }
        }
    }

    let mut candidates: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for step in &ordered {
        let snapshot = step.snapshot;
        if config.regime_filter && snapshot.regime().label == RegimeLabel::Correction {
            info!(
                snapshot = %snapshot.data_as_of_date(),
                "regime filter: skipping entries from CORRECTION snapshot"
            );
            continue;
        }
        for record in snapshot.candidates(config.entry_threshold) {
            candidates
                .entry(record.ticker.clone())
                .or_default()
                .push(Candidate {
                    decision_date: step.entry_date,
                    snapshot_date: snapshot.data_as_of_date(),
                    composite_score: record.composite_score,
                });
        }
    }

    let snapshot_dates: Vec<NaiveDate> = ordered
        .iter()
        .map(|s| s.snapshot.data_as_of_date())
        .collect();

    let (Some(first), Some(last)) = (ordered.first(), ordered.last()) else {
        return Ok(assemble(snapshot_dates, Vec::new(), Vec::new(), Vec::new(), Vec::new(), 0, config));
    };
    let (start, end) = price_window(first.entry_date, last.entry_date, &config.exit_rules);

    info!(
        steps = ordered.len(),
        tickers = candidates.len(),
        %start,
        %end,
        "running backtest"
    );

    let simulations: Vec<TickerSimulation> = candidates
        .par_iter()
        .map(|(ticker, cands)| simulate_ticker(prices, ticker, cands, start, end, &config.exit_rules))
        .collect();

    let mut trades = Vec::new();
    let mut open_at_end = Vec::new();
    let mut skipped = Vec::new();
    for sim in simulations {
        trades.extend(sim.trades);
        open_at_end.extend(sim.open);
        skipped.extend(sim.skipped);
    }
    trades.sort_by(|a, b| {
        a.entry_date
            .cmp(&b.entry_date)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    debug_assert!(trades.iter().all(|t| t.snapshot_date <= t.entry_date));

    let benchmark_returns = match &config.benchmark {
        Some(id) => benchmark_returns(prices, id, &trades, start, end),
        None => Vec::new(),
    };

    let run = assemble(
        snapshot_dates,
        trades,
        benchmark_returns,
        skipped,
        open_at_end,
        validation_warnings,
        config,
    );
    info!(
        trades = run.metrics.total_trades,
        skipped = run.skipped.len(),
        open_at_end = run.open_at_end.len(),
        "backtest complete"
    );
    Ok(run)
}

fn assemble(
    snapshot_dates: Vec<NaiveDate>,
    trades: Vec<Trade>,
    benchmark_returns: Vec<Option<f64>>,
    skipped: Vec<SkippedTicker>,
    open_at_end: Vec<OpenPosition>,
    validation_warnings: usize,
    config: &BacktestConfig,
) -> BacktestRun {
    let metrics = RunMetrics::compute(&trades, &benchmark_returns, config.periods_per_year);
    let ticker_results = TickerResult::compute_per_ticker(&trades);
    BacktestRun {
        snapshot_dates,
        trades,
        metrics,
        ticker_results,
        skipped,
        open_at_end,
        validation_warnings,
    }
}

/// Calendar window covering MA warmup before the first decision and the
/// longest hold after the last one.
fn price_window(first: NaiveDate, last: NaiveDate, rules: &ExitRules) -> (NaiveDate, NaiveDate) {
    let warmup = (rules.ma_period as i64) * 2 + 10;
    let longest = rules.max_hold_a.max(rules.max_hold_b).max(rules.max_hold_c) as i64;
    (
        first - Duration::days(warmup),
        last + Duration::days(longest * 2 + 14),
    )
}

fn simulate_ticker(
    prices: &(dyn PriceDataPort + Sync),
    ticker: &str,
    candidates: &[Candidate],
    start: NaiveDate,
    end: NaiveDate,
    rules: &ExitRules,
) -> TickerSimulation {
    let mut bars = match prices.price_history(ticker, start, end) {
        Ok(bars) if !bars.is_empty() => bars,
        Ok(_) => return skip(ticker, "no price data in window".to_string()),
        Err(e) => return skip(ticker, e.to_string()),
    };
    bars.sort_by_key(|b| b.date);

    let ma = calculate_sma(&bars, rules.ma_period);
    let mut sim = TickerSimulation::default();
    let mut last_exit: Option<NaiveDate> = None;

    for candidate in candidates {
        let entry_idx = bars.partition_point(|b| b.date <= candidate.decision_date);
        let Some(entry_bar) = bars.get(entry_idx) else {
            debug!(%ticker, decision = %candidate.decision_date, "no bar after decision date");
            break;
        };
        if last_exit.is_some_and(|exit| entry_bar.date <= exit) {
            debug!(%ticker, decision = %candidate.decision_date, "position already open, entry skipped");
            continue;
        }

        match run_position(&bars, entry_idx, candidate, &ma, rules) {
            PositionOutcome::Closed(trade) => {
                last_exit = Some(trade.exit_date);
                sim.trades.push(trade);
            }
            PositionOutcome::StillOpen(position) => {
                warn!(%ticker, entry = %position.entry_date, "position still open at end of price data");
                sim.open.push(position);
                break;
            }
        }
    }
    sim
}

enum PositionOutcome {
    Closed(Trade),
    StillOpen(OpenPosition),
}

fn run_position(
    bars: &[OhlcvBar],
    entry_idx: usize,
    candidate: &Candidate,
    ma: &IndicatorSeries,
    rules: &ExitRules,
) -> PositionOutcome {
    let mut position = OpenPosition::open(
        &bars[entry_idx],
        candidate.snapshot_date,
        candidate.composite_score,
    );
    for (idx, bar) in bars.iter().enumerate().skip(entry_idx + 1) {
        if let Some((reason, price)) = position.on_bar(bar.close, ma.value_at(idx), rules) {
            return PositionOutcome::Closed(position.close(bar.date, price, reason));
        }
    }
    PositionOutcome::StillOpen(position)
}

fn skip(ticker: &str, reason: String) -> TickerSimulation {
    warn!(%ticker, %reason, "missing price data, ticker skipped");
    TickerSimulation {
        skipped: Some(SkippedTicker {
            ticker: ticker.to_string(),
            reason,
        }),
        ..Default::default()
    }
}

/// Close-to-close benchmark return over each trade's holding window, index
/// aligned with `trades`. `None` where the series does not cover the entry.
fn benchmark_returns(
    prices: &(dyn PriceDataPort + Sync),
    benchmark: &str,
    trades: &[Trade],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<Option<f64>> {
    if trades.is_empty() {
        return Vec::new();
    }
    let mut series = match prices.benchmark_index_series(benchmark, start, end) {
        Ok(series) => series,
        Err(e) => {
            warn!(%benchmark, error = %e, "benchmark series unavailable, delta not computed");
            return Vec::new();
        }
    };
    series.sort_by_key(|b| b.date);

    let returns: Vec<Option<f64>> = trades
        .iter()
        .map(|t| {
            let entry = close_on_or_before(&series, t.entry_date)?;
            let exit = close_on_or_before(&series, t.exit_date)?;
            (entry > 0.0).then(|| exit / entry - 1.0)
        })
        .collect();

    let uncovered = returns.iter().filter(|r| r.is_none()).count();
    if uncovered > 0 {
        warn!(
            %benchmark,
            uncovered,
            trades = trades.len(),
            "benchmark series misses some trade windows, delta uses covered trades only"
        );
    }
    returns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::ExitReason;
    use crate::domain::regime::RegimeState;
    use crate::domain::score::ScoreRecord;
    use crate::domain::snapshot::Coverage;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct FixturePrices {
        series: HashMap<String, Vec<OhlcvBar>>,
    }

    impl PriceDataPort for FixturePrices {
        fn price_history(
            &self,
            ticker: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<OhlcvBar>, RanktraderError> {
            let bars = self
                .series
                .get(ticker)
                .ok_or_else(|| RanktraderError::NoData {
                    ticker: ticker.to_string(),
                })?;
            Ok(bars
                .iter()
                .filter(|b| b.date >= start && b.date <= end)
                .cloned()
                .collect())
        }
    }

    fn path(ticker: &str, first: NaiveDate, closes: &[f64]) -> Vec<OhlcvBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| OhlcvBar {
                ticker: ticker.into(),
                date: first + Duration::days(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1000,
            })
            .collect()
    }

    fn snapshot(date: NaiveDate, scores: &[(&str, f64)], label: RegimeLabel) -> Snapshot {
        let records = scores
            .iter()
            .map(|(t, s)| ScoreRecord {
                ticker: t.to_string(),
                component_scores: Default::default(),
                composite_score: *s,
                data_as_of_date: Some(date),
                score_generated_at: Some(Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap()),
            })
            .collect::<Vec<_>>();
        let n = records.len();
        Snapshot::from_parts(
            date,
            records,
            RegimeState::new(date, label),
            Coverage {
                requested: n,
                scored: n,
                failed: vec![],
            },
            true,
        )
    }

    fn no_benchmark() -> BacktestConfig {
        BacktestConfig {
            benchmark: None,
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn stop_loss_on_day_twelve() {
        let as_of = d(2025, 8, 15);
        let mut closes = vec![100.0; 40];
        // index 20 is the as-of bar, 21 is day 0, 33 is day 12
        closes[33] = 92.0;
        let first = as_of - Duration::days(20);
        let prices = FixturePrices {
            series: HashMap::from([("X".to_string(), path("X", first, &closes))]),
        };
        let snap = snapshot(as_of, &[("X", 70.0)], RegimeLabel::ConfirmedUptrend);
        let run = run_backtest(&steps_from_snapshots(std::slice::from_ref(&snap)), &prices, &no_benchmark()).unwrap();

        assert_eq!(run.trades.len(), 1);
        let trade = &run.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.hold_days, 12);
        assert!((trade.return_pct - (-0.08)).abs() < 1e-9);
        assert_eq!(trade.entry_date, as_of + Duration::days(1));
    }

    #[test]
    fn below_threshold_not_entered() {
        let as_of = d(2025, 8, 15);
        let prices = FixturePrices {
            series: HashMap::from([("X".to_string(), path("X", as_of, &[100.0; 30]))]),
        };
        let snap = snapshot(as_of, &[("X", 50.0)], RegimeLabel::ConfirmedUptrend);
        let run = run_backtest(&steps_from_snapshots(std::slice::from_ref(&snap)), &prices, &no_benchmark()).unwrap();
        assert!(run.trades.is_empty());
    }

    #[test]
    fn contaminated_step_aborts() {
        let snap = snapshot(d(2025, 8, 1), &[("X", 90.0)], RegimeLabel::ConfirmedUptrend);
        let prices = FixturePrices {
            series: HashMap::new(),
        };
        let steps = [SimulationStep {
            entry_date: d(2025, 2, 1),
            snapshot: &snap,
        }];
        let err = run_backtest(&steps, &prices, &no_benchmark()).unwrap_err();
        assert!(matches!(err, RanktraderError::Contamination(ref c) if c.count == 1));
    }

    #[test]
    fn missing_prices_skip_ticker() {
        let as_of = d(2025, 8, 15);
        let prices = FixturePrices {
            series: HashMap::from([("X".to_string(), path("X", as_of, &[100.0; 30]))]),
        };
        let snap = snapshot(as_of, &[("X", 70.0), ("GONE", 90.0)], RegimeLabel::ConfirmedUptrend);
        let run = run_backtest(&steps_from_snapshots(std::slice::from_ref(&snap)), &prices, &no_benchmark()).unwrap();
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].ticker, "GONE");
    }

    #[test]
    fn regime_filter_skips_correction() {
        let as_of = d(2025, 8, 15);
        let prices = FixturePrices {
            series: HashMap::from([("X".to_string(), path("X", as_of, &[100.0; 60]))]),
        };
        let snap = snapshot(as_of, &[("X", 90.0)], RegimeLabel::Correction);
        let config = BacktestConfig {
            regime_filter: true,
            ..no_benchmark()
        };
        let run = run_backtest(&steps_from_snapshots(std::slice::from_ref(&snap)), &prices, &config).unwrap();
        assert!(run.trades.is_empty());
        assert!(run.open_at_end.is_empty());
    }

    #[test]
    fn open_position_reported_not_counted() {
        let as_of = d(2025, 8, 15);
        let prices = FixturePrices {
            series: HashMap::from([("X".to_string(), path("X", as_of, &[100.0; 10]))]),
        };
        let snap = snapshot(as_of, &[("X", 70.0)], RegimeLabel::ConfirmedUptrend);
        let run = run_backtest(&steps_from_snapshots(std::slice::from_ref(&snap)), &prices, &no_benchmark()).unwrap();
        assert!(run.trades.is_empty());
        assert_eq!(run.open_at_end.len(), 1);
        assert_eq!(run.metrics.total_trades, 0);
    }

    #[test]
    fn no_reentry_while_open() {
        let first = d(2025, 8, 1);
        let prices = FixturePrices {
            series: HashMap::from([("X".to_string(), path("X", first, &[100.0; 80]))]),
        };
        let s1 = snapshot(first, &[("X", 70.0)], RegimeLabel::ConfirmedUptrend);
        let s2 = snapshot(first + Duration::days(7), &[("X", 70.0)], RegimeLabel::ConfirmedUptrend);
        let snaps = [s1, s2];
        let run = run_backtest(&steps_from_snapshots(&snaps), &prices, &no_benchmark()).unwrap();
        // tier B holds 40 days on a flat path; second snapshot falls inside it
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.trades[0].exit_reason, ExitReason::HoldPeriodExpired);
        assert_eq!(run.trades[0].hold_days, 40);
    }

    #[test]
    fn benchmark_delta_uses_trade_window() {
        let as_of = d(2025, 8, 15);
        let mut closes = vec![100.0; 40];
        closes[33] = 92.0;
        let first = as_of - Duration::days(20);
        let bench: Vec<f64> = (0..40).map(|i| if i >= 33 { 110.0 } else { 100.0 }).collect();
        let prices = FixturePrices {
            series: HashMap::from([
                ("X".to_string(), path("X", first, &closes)),
                ("SPY".to_string(), path("SPY", first, &bench)),
            ]),
        };
        let snap = snapshot(as_of, &[("X", 70.0)], RegimeLabel::ConfirmedUptrend);
        let run = run_backtest(
            &steps_from_snapshots(std::slice::from_ref(&snap)),
            &prices,
            &BacktestConfig::default(),
        )
        .unwrap();
        let delta = run.metrics.benchmark_delta.unwrap();
        assert!((delta - (-0.08 - 0.10)).abs() < 1e-9);
    }

    #[test]
    fn benchmark_delta_skips_uncovered_trades() {
        let first = d(2025, 7, 26);
        // as-of at index 20 and 41; entries at 21 and 42
        let mut closes = vec![100.0; 70];
        closes[33] = 92.0;
        closes[50] = 121.0;
        for c in closes.iter_mut().skip(51) {
            *c = 121.0;
        }
        // benchmark starts at index 40, after the first entry
        let bench: Vec<f64> = (0..30).map(|j| if j >= 10 { 110.0 } else { 100.0 }).collect();
        let prices = FixturePrices {
            series: HashMap::from([
                ("X".to_string(), path("X", first, &closes)),
                ("SPY".to_string(), path("SPY", first + Duration::days(40), &bench)),
            ]),
        };
        let snaps = vec![
            snapshot(first + Duration::days(20), &[("X", 70.0)], RegimeLabel::ConfirmedUptrend),
            snapshot(first + Duration::days(41), &[("X", 70.0)], RegimeLabel::ConfirmedUptrend),
        ];
        let run = run_backtest(&steps_from_snapshots(&snaps), &prices, &BacktestConfig::default()).unwrap();

        assert_eq!(run.trades.len(), 2);
        assert_eq!(run.trades[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(run.trades[1].exit_reason, ExitReason::ProfitTarget);
        assert_eq!(run.metrics.benchmark_trades, 1);
        assert!((run.metrics.avg_benchmark_return.unwrap() - 0.10).abs() < 1e-9);
        assert!((run.metrics.benchmark_delta.unwrap() - (0.21 - 0.10)).abs() < 1e-9);
    }

    #[test]
    fn entry_day_close_is_not_an_exit_day() {
        let as_of = d(2025, 8, 15);
        let first = as_of - Duration::days(20);
        let mut bars = path("X", first, &[100.0; 40]);
        // day 0 opens at 100 and closes at 80; day 1 stays there
        bars[21].close = 80.0;
        bars[21].low = 80.0;
        bars[22].close = 80.0;
        let prices = FixturePrices {
            series: HashMap::from([("X".to_string(), bars)]),
        };
        let snap = snapshot(as_of, &[("X", 70.0)], RegimeLabel::ConfirmedUptrend);
        let run = run_backtest(&steps_from_snapshots(std::slice::from_ref(&snap)), &prices, &no_benchmark()).unwrap();

        let trade = &run.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_date, as_of + Duration::days(2));
        assert_eq!(trade.hold_days, 1);
        assert!((trade.exit_price - 92.0).abs() < 1e-9);
    }

    #[test]
    fn empty_steps_give_empty_run() {
        let prices = FixturePrices {
            series: HashMap::new(),
        };
        let run = run_backtest(&[], &prices, &BacktestConfig::default()).unwrap();
        assert!(run.trades.is_empty());
        assert!(run.snapshot_dates.is_empty());
    }
}
