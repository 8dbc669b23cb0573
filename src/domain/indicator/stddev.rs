//! Standard deviation of daily close-to-close returns.
//!
//! RETSTDDEV(n)[i] = sqrt(sum((r[i-j] - mean(r))^2 for j in 0..n) / n)
//! where r[k] = C[k] / C[k-1] - 1.
//! Warmup: first n bars are invalid (n returns need n+1 closes).

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::OhlcvBar;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub fn calculate_return_stddev(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let returns: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            if w[0].close > 0.0 {
                w[1].close / w[0].close - 1.0
            } else {
                0.0
            }
        })
        .collect();

    let mut values = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        // bar i closes return index i-1
        let valid = period > 0 && i >= period;

        let value = if valid {
            let window = &returns[i - period..i];
            let mean = window.iter().sum::<f64>() / period as f64;
            let variance = window
                .iter()
                .map(|r| {
                    let diff = r - mean;
                    diff * diff
                })
                .sum::<f64>()
                / period as f64;
            variance.sqrt()
        } else {
            0.0
        };

        values.push(IndicatorPoint {
            date: bar.date,
            valid,
            value,
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::ReturnStddev(period),
        values,
    }
}

/// Annualised realised volatility in percent, VIX-comparable.
pub fn realized_volatility_pct(bars: &[OhlcvBar], period: usize) -> Option<f64> {
    calculate_return_stddev(bars, period)
        .last_valid()
        .map(|sd| sd * TRADING_DAYS_PER_YEAR.sqrt() * 100.0)
}
