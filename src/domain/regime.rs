//! Market regime detection.
//!
//! Each broad-market index is scored against a five-point trend checklist as
//! of a date; the whole-market label is downgraded by any single weak index or
//! by an elevated volatility reading.

use crate::domain::indicator::sma::calculate_sma;
use crate::domain::indicator::stddev::realized_volatility_pct;
use crate::domain::ohlcv::{bars_as_of, close_on_or_before, OhlcvBar};
use crate::ports::data_port::PriceDataPort;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

pub const SHORT_MA: usize = 50;
pub const MEDIUM_MA: usize = 150;
pub const LONG_MA: usize = 200;
/// Trading days over which the long MA must be rising.
pub const SLOPE_LOOKBACK: usize = 21;
pub const CHECKLIST_SIZE: u8 = 5;
/// Calendar days of history fetched to cover LONG_MA + SLOPE_LOOKBACK trading days.
const HISTORY_CALENDAR_DAYS: i64 = 400;

/// Ordered worst to best: `Correction < Pressure < ConfirmedUptrend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    Correction,
    Pressure,
    ConfirmedUptrend,
}

impl RegimeLabel {
    pub fn score_adjustment(&self) -> f64 {
        match self {
            RegimeLabel::Correction => -15.0,
            RegimeLabel::Pressure => -5.0,
            RegimeLabel::ConfirmedUptrend => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::Correction => "CORRECTION",
            RegimeLabel::Pressure => "PRESSURE",
            RegimeLabel::ConfirmedUptrend => "CONFIRMED_UPTREND",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCheck {
    pub index_id: String,
    /// price>MA150, price>MA200, MA150>MA200, MA50>MA150>MA200, MA200 rising
    pub criteria: [bool; 5],
}

impl IndexCheck {
    pub fn passes(&self) -> u8 {
        self.criteria.iter().filter(|c| **c).count() as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub as_of_date: NaiveDate,
    pub label: RegimeLabel,
    pub score_adjustment: f64,
    pub index_checks: Vec<IndexCheck>,
    pub volatility: Option<f64>,
}

impl RegimeState {
    pub fn new(as_of_date: NaiveDate, label: RegimeLabel) -> Self {
        RegimeState {
            as_of_date,
            label,
            score_adjustment: label.score_adjustment(),
            index_checks: Vec::new(),
            volatility: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeConfig {
    pub indices: Vec<String>,
    /// Series whose close is read as the volatility proxy (e.g. VIX).
    pub volatility_index: Option<String>,
    /// An index passing this many criteria or fewer is weak.
    pub weak_max_passes: u8,
    pub volatility_elevated: f64,
    pub volatility_high: f64,
    /// Window for the realised-volatility fallback.
    pub realized_vol_period: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            indices: vec!["SPY".to_string(), "QQQ".to_string()],
            volatility_index: Some("VIX".to_string()),
            weak_max_passes: 2,
            volatility_elevated: 20.0,
            volatility_high: 30.0,
            realized_vol_period: 20,
        }
    }
}

/// Evaluate the five-point checklist on bars already cut at the as-of date.
/// Returns `None` when there is not enough history for the long average.
pub fn evaluate_checklist(bars: &[OhlcvBar]) -> Option<[bool; 5]> {
    if bars.len() < LONG_MA {
        return None;
    }
    let last = bars.len() - 1;
    let price = bars[last].close;

    let short = calculate_sma(bars, SHORT_MA);
    let medium = calculate_sma(bars, MEDIUM_MA);
    let long = calculate_sma(bars, LONG_MA);

    let ma_short = short.value_at(last)?;
    let ma_medium = medium.value_at(last)?;
    let ma_long = long.value_at(last)?;

    let long_rising = last
        .checked_sub(SLOPE_LOOKBACK)
        .and_then(|i| long.value_at(i))
        .is_some_and(|earlier| ma_long > earlier);

    Some([
        price > ma_medium,
        price > ma_long,
        ma_medium > ma_long,
        ma_short > ma_medium && ma_medium > ma_long,
        long_rising,
    ])
}

/// Whole-market classification from per-index pass counts and a volatility
/// reading. Any weakness downgrades the label.
pub fn classify(pass_counts: &[u8], volatility: Option<f64>, config: &RegimeConfig) -> RegimeLabel {
    let is_weak = |p: &u8| *p <= config.weak_max_passes;
    let all_weak = pass_counts.iter().all(is_weak);
    let any_weak = pass_counts.iter().any(is_weak);
    let vol = volatility.unwrap_or(0.0);

    if all_weak || vol > config.volatility_high {
        RegimeLabel::Correction
    } else if any_weak || vol > config.volatility_elevated {
        RegimeLabel::Pressure
    } else {
        RegimeLabel::ConfirmedUptrend
    }
}

pub struct RegimeDetector<'a> {
    prices: &'a dyn PriceDataPort,
    config: RegimeConfig,
}

impl<'a> RegimeDetector<'a> {
    pub fn new(prices: &'a dyn PriceDataPort, config: RegimeConfig) -> Self {
        Self { prices, config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Classify the market as of `as_of`, using only bars dated on or before it.
    pub fn compute_regime(&self, as_of: NaiveDate) -> RegimeState {
        let start = as_of - Duration::days(HISTORY_CALENDAR_DAYS);
        let mut index_checks = Vec::with_capacity(self.config.indices.len());
        let mut first_series: Option<Vec<OhlcvBar>> = None;

        for index_id in &self.config.indices {
            let bars = match self.prices.benchmark_index_series(index_id, start, as_of) {
                Ok(bars) => bars,
                Err(e) => {
                    warn!(index = %index_id, %as_of, error = %e, "index series unavailable, counting as weak");
                    Vec::new()
                }
            };
            let visible = bars_as_of(&bars, as_of);

            let criteria = evaluate_checklist(visible).unwrap_or_else(|| {
                warn!(
                    index = %index_id,
                    %as_of,
                    bars = visible.len(),
                    "not enough history for trend checklist, counting as weak"
                );
                [false; 5]
            });
            let check = IndexCheck {
                index_id: index_id.clone(),
                criteria,
            };
            debug!(index = %index_id, passes = check.passes(), "trend checklist");
            index_checks.push(check);

            if first_series.is_none() {
                first_series = Some(visible.to_vec());
            }
        }

        let volatility = self.volatility_reading(as_of, start, first_series.as_deref());
        let pass_counts: Vec<u8> = index_checks.iter().map(IndexCheck::passes).collect();
        let label = classify(&pass_counts, volatility, &self.config);

        RegimeState {
            as_of_date: as_of,
            label,
            score_adjustment: label.score_adjustment(),
            index_checks,
            volatility,
        }
    }

    fn volatility_reading(
        &self,
        as_of: NaiveDate,
        start: NaiveDate,
        fallback: Option<&[OhlcvBar]>,
    ) -> Option<f64> {
        if let Some(vol_id) = &self.config.volatility_index {
            match self.prices.benchmark_index_series(vol_id, start, as_of) {
                Ok(series) => {
                    if let Some(close) = close_on_or_before(&series, as_of) {
                        return Some(close);
                    }
                    warn!(index = %vol_id, %as_of, "volatility series empty, using realised volatility");
                }
                Err(e) => {
                    warn!(index = %vol_id, %as_of, error = %e, "volatility series unavailable, using realised volatility");
                }
            }
        }
        fallback.and_then(|bars| realized_volatility_pct(bars, self.config.realized_vol_period))
    }
}
