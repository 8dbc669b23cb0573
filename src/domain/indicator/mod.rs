//! Moving-average and volatility indicators used by the regime checklist and
//! the BREAK_MA exit rule.
//!
//! - `IndicatorPoint`: a single point in an indicator time series
//! - `IndicatorType`: indicator identity + parameters
//! - `IndicatorSeries`: a time series aligned one-to-one with its input bars

pub mod sma;
pub mod stddev;

use chrono::NaiveDate;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub date: NaiveDate,
    pub valid: bool,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma(usize),
    ReturnStddev(usize),
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// Value at bar index `i`, or `None` during warmup.
    pub fn value_at(&self, i: usize) -> Option<f64> {
        self.values.get(i).filter(|p| p.valid).map(|p| p.value)
    }

    /// Most recent valid value.
    pub fn last_valid(&self) -> Option<f64> {
        self.values.last().filter(|p| p.valid).map(|p| p.value)
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::ReturnStddev(period) => write!(f, "RETSTDDEV({})", period),
        }
    }
}
