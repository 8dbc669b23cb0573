//! Simple Moving Average.
//!
//! SMA(n)[i] = sum(C[i-j] for j in 0..n) / n
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_sma(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());
    let mut running = 0.0_f64;

    for (i, bar) in bars.iter().enumerate() {
        running += bar.close;
        if period > 0 && i >= period {
            running -= bars[i - period].close;
        }

        let valid = period > 0 && i + 1 >= period;
        values.push(IndicatorPoint {
            date: bar.date,
            valid,
            value: if valid { running / period as f64 } else { 0.0 },
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values,
    }
}
