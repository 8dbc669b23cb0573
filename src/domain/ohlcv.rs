//! OHLCV bar representation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Bars dated on or before `as_of`. Input must be sorted by date ascending.
pub fn bars_as_of(bars: &[OhlcvBar], as_of: NaiveDate) -> &[OhlcvBar] {
    let end = bars.partition_point(|b| b.date <= as_of);
    &bars[..end]
}

/// Close of the last bar dated on or before `date`.
pub fn close_on_or_before(bars: &[OhlcvBar], date: NaiveDate) -> Option<f64> {
    bars_as_of(bars, date).last().map(|b| b.close)
}
