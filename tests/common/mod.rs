#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
pub use ranktrader::domain::ohlcv::OhlcvBar;
use ranktrader::domain::error::{RanktraderError, ScoreError};
use ranktrader::domain::regime::RegimeState;
use ranktrader::domain::score::{Factor, ScoreRecord};
use ranktrader::domain::snapshot::{Coverage, Snapshot};
use ranktrader::ports::data_port::PriceDataPort;
use ranktrader::ports::scoring_port::ScoringPort;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// A fixed "now" well after every fixture date.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap()
}

pub struct MockPricePort {
    pub data: HashMap<String, Vec<OhlcvBar>>,
    pub errors: HashMap<String, String>,
}

impl MockPricePort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, ticker: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data.insert(ticker.to_string(), bars);
        self
    }

    pub fn with_error(mut self, ticker: &str, reason: &str) -> Self {
        self.errors.insert(ticker.to_string(), reason.to_string());
        self
    }
}

impl PriceDataPort for MockPricePort {
    fn price_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, RanktraderError> {
        if let Some(reason) = self.errors.get(ticker) {
            return Err(RanktraderError::Database {
                reason: reason.clone(),
            });
        }
        let bars = self
            .data
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

/// Deterministic scorer keyed by `(factor, ticker)`. Records every as-of date
/// it is asked about and can inject rate-limit failures.
pub struct MockScorer {
    pub scores: HashMap<(Factor, String), f64>,
    /// Remaining rate-limit responses per ticker before it starts answering.
    pub rate_limits: Mutex<HashMap<String, usize>>,
    pub calls: AtomicUsize,
    pub seen_as_of: Mutex<Vec<NaiveDate>>,
    /// Per-ticker sleep before answering.
    pub delays: HashMap<String, std::time::Duration>,
}

impl MockScorer {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            rate_limits: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            seen_as_of: Mutex::new(Vec::new()),
            delays: HashMap::new(),
        }
    }

    /// Same score for every factor.
    pub fn with_ticker(mut self, ticker: &str, score: f64) -> Self {
        for factor in Factor::ALL {
            self.scores.insert((factor, ticker.to_string()), score);
        }
        self
    }

    pub fn with_score(mut self, factor: Factor, ticker: &str, score: f64) -> Self {
        self.scores.insert((factor, ticker.to_string()), score);
        self
    }

    pub fn with_rate_limits(self, ticker: &str, times: usize) -> Self {
        self.rate_limits
            .lock()
            .unwrap()
            .insert(ticker.to_string(), times);
        self
    }

    pub fn with_delay(mut self, ticker: &str, delay: std::time::Duration) -> Self {
        self.delays.insert(ticker.to_string(), delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, factor: Factor, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_as_of.lock().unwrap().push(as_of);
        if let Some(delay) = self.delays.get(ticker) {
            std::thread::sleep(*delay);
        }

        {
            let mut limits = self.rate_limits.lock().unwrap();
            if let Some(remaining) = limits.get_mut(ticker) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ScoreError::RateLimited { retry_after: None });
                }
            }
        }

        self.scores
            .get(&(factor, ticker.to_string()))
            .copied()
            .ok_or_else(|| ScoreError::NotFound {
                ticker: ticker.to_string(),
                as_of,
            })
    }
}

impl ScoringPort for MockScorer {
    fn score_technical(&self, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError> {
        self.lookup(Factor::Technical, ticker, as_of)
    }

    fn score_momentum(&self, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError> {
        self.lookup(Factor::Momentum, ticker, as_of)
    }

    fn score_fundamental(&self, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError> {
        self.lookup(Factor::Fundamental, ticker, as_of)
    }
}

/// One bar per calendar day starting at `first`, open = close.
pub fn daily_bars(ticker: &str, first: NaiveDate, closes: &[f64]) -> Vec<OhlcvBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| OhlcvBar {
            ticker: ticker.to_string(),
            date: first + Duration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 10_000,
        })
        .collect()
}

/// `count` daily bars ending on `last`, rising by `step` per day.
pub fn trending_bars(ticker: &str, last: NaiveDate, count: usize, start: f64, step: f64) -> Vec<OhlcvBar> {
    let closes: Vec<f64> = (0..count).map(|i| start + step * i as f64).collect();
    daily_bars(ticker, last - Duration::days(count as i64 - 1), &closes)
}

/// Constant volatility-index series ending on `last`.
pub fn flat_series(ticker: &str, last: NaiveDate, count: usize, level: f64) -> Vec<OhlcvBar> {
    trending_bars(ticker, last, count, level, 0.0)
}

pub fn record(ticker: &str, composite: f64, data_as_of: NaiveDate) -> ScoreRecord {
    ScoreRecord {
        ticker: ticker.to_string(),
        component_scores: Factor::ALL.iter().map(|f| (*f, composite)).collect(),
        composite_score: composite,
        data_as_of_date: Some(data_as_of),
        score_generated_at: Some(fixed_now()),
    }
}

pub fn make_snapshot(as_of: NaiveDate, records: Vec<ScoreRecord>, regime: RegimeState) -> Snapshot {
    let n = records.len();
    Snapshot::from_parts(
        as_of,
        records,
        regime,
        Coverage {
            requested: n,
            scored: n,
            failed: Vec::new(),
        },
        true,
    )
}
