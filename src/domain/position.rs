//! Trade lifecycle: an open position is evaluated bar by bar until one of the
//! exit rules fires, then consumed into an immutable [`Trade`].

use crate::domain::ohlcv::OhlcvBar;
use crate::domain::score::QualityTier;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for threshold comparisons on returns.
pub const RETURN_EPSILON: f64 = 1e-9;

/// Declared in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    BreakMa,
    ProfitTarget,
    HoldPeriodExpired,
}

impl ExitReason {
    pub const ALL: [ExitReason; 5] = [
        ExitReason::StopLoss,
        ExitReason::TrailingStop,
        ExitReason::BreakMa,
        ExitReason::ProfitTarget,
        ExitReason::HoldPeriodExpired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::BreakMa => "BREAK_MA",
            ExitReason::ProfitTarget => "PROFIT_TARGET",
            ExitReason::HoldPeriodExpired => "HOLD_PERIOD_EXPIRED",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitRules {
    /// Negative fraction, e.g. -0.08.
    pub stop_loss: f64,
    /// Peak return that arms the trailing stop.
    pub trailing_activation: f64,
    /// Fractional give-back from the peak close.
    pub trailing_stop: f64,
    pub profit_target: f64,
    pub ma_period: usize,
    pub max_hold_a: usize,
    pub max_hold_b: usize,
    pub max_hold_c: usize,
}

impl Default for ExitRules {
    fn default() -> Self {
        ExitRules {
            stop_loss: -0.08,
            trailing_activation: 0.15,
            trailing_stop: 0.10,
            profit_target: 0.20,
            ma_period: 20,
            max_hold_a: 60,
            max_hold_b: 40,
            max_hold_c: 20,
        }
    }
}

impl ExitRules {
    pub fn max_hold(&self, tier: QualityTier) -> usize {
        match tier {
            QualityTier::A => self.max_hold_a,
            QualityTier::B => self.max_hold_b,
            QualityTier::C => self.max_hold_c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticker: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub snapshot_date: NaiveDate,
    pub composite_score: f64,
    pub quality_tier: QualityTier,
    pub peak_close: f64,
    pub trailing_armed: bool,
    pub hold_days: usize,
}

impl OpenPosition {
    /// Open at the entry bar's open. The entry bar is day 0 and its close is
    /// not evaluated; exits start on day 1, so a stop breached on day 0 fills
    /// at the stop level on day 1.
    pub fn open(entry_bar: &OhlcvBar, snapshot_date: NaiveDate, composite_score: f64) -> Self {
        OpenPosition {
            ticker: entry_bar.ticker.clone(),
            entry_date: entry_bar.date,
            entry_price: entry_bar.open,
            snapshot_date,
            composite_score,
            quality_tier: QualityTier::from_composite(composite_score),
            peak_close: entry_bar.open.max(entry_bar.close),
            trailing_armed: false,
            hold_days: 0,
        }
    }

    pub fn return_at(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price
    }

    /// Advance one trading day. `short_ma` is the moving average at this bar,
    /// `None` during warmup. Returns the exit reason and fill price when a rule
    /// fires; earlier rules take priority.
    pub fn on_bar(
        &mut self,
        close: f64,
        short_ma: Option<f64>,
        rules: &ExitRules,
    ) -> Option<(ExitReason, f64)> {
        self.hold_days += 1;
        let ret = self.return_at(close);

        if ret <= rules.stop_loss + RETURN_EPSILON {
            return Some((
                ExitReason::StopLoss,
                self.entry_price * (1.0 + rules.stop_loss),
            ));
        }

        if close > self.peak_close {
            self.peak_close = close;
        }
        if self.return_at(self.peak_close) >= rules.trailing_activation - RETURN_EPSILON {
            self.trailing_armed = true;
        }
        if self.trailing_armed && close < self.peak_close * (1.0 - rules.trailing_stop) {
            return Some((ExitReason::TrailingStop, close));
        }

        if short_ma.is_some_and(|ma| close < ma) {
            return Some((ExitReason::BreakMa, close));
        }

        if ret >= rules.profit_target - RETURN_EPSILON {
            return Some((ExitReason::ProfitTarget, close));
        }

        if self.hold_days >= rules.max_hold(self.quality_tier) {
            return Some((ExitReason::HoldPeriodExpired, close));
        }

        None
    }

    pub fn close(self, exit_date: NaiveDate, exit_price: f64, exit_reason: ExitReason) -> Trade {
        let return_pct = self.return_at(exit_price);
        Trade {
            ticker: self.ticker,
            entry_date: self.entry_date,
            entry_price: self.entry_price,
            exit_date,
            exit_price,
            exit_reason,
            return_pct,
            hold_days: self.hold_days,
            snapshot_date: self.snapshot_date,
            composite_score: self.composite_score,
            quality_tier: self.quality_tier,
        }
    }
}

/// A closed trade. `return_pct` is a fraction: -0.08 means -8%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub ticker: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub return_pct: f64,
    pub hold_days: usize,
    pub snapshot_date: NaiveDate,
    pub composite_score: f64,
    pub quality_tier: QualityTier,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.return_pct > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bar(price: f64) -> OhlcvBar {
        OhlcvBar {
            ticker: "BHP".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1000,
        }
    }

    fn sample_position(composite: f64) -> OpenPosition {
        OpenPosition::open(
            &entry_bar(100.0),
            NaiveDate::from_ymd_opt(2024, 1, 12).unwrap(),
            composite,
        )
    }

    #[test]
    fn open_uses_bar_open_and_tier() {
        let pos = sample_position(85.0);
        assert!((pos.entry_price - 100.0).abs() < f64::EPSILON);
        assert_eq!(pos.quality_tier, QualityTier::A);
        assert_eq!(pos.hold_days, 0);
    }

    #[test]
    fn flat_prices_never_exit_early() {
        let rules = ExitRules::default();
        let mut pos = sample_position(70.0);
        for _ in 0..39 {
            assert!(pos.on_bar(100.0, Some(100.0), &rules).is_none());
        }
        assert_eq!(
            pos.on_bar(100.0, Some(100.0), &rules),
            Some((ExitReason::HoldPeriodExpired, 100.0))
        );
        assert_eq!(pos.hold_days, 40);
    }

    #[test]
    fn stop_loss_fills_at_stop_level() {
        let rules = ExitRules::default();
        let mut pos = sample_position(70.0);
        let (reason, price) = pos.on_bar(85.0, None, &rules).unwrap();
        assert_eq!(reason, ExitReason::StopLoss);
        assert!((price - 92.0).abs() < 1e-9);
    }

    #[test]
    fn exact_stop_triggers_despite_rounding() {
        let rules = ExitRules::default();
        let mut pos = sample_position(70.0);
        assert_eq!(pos.on_bar(92.0, None, &rules).map(|e| e.0), Some(ExitReason::StopLoss));
    }

    #[test]
    fn stop_loss_beats_break_ma() {
        let rules = ExitRules::default();
        let mut pos = sample_position(70.0);
        let exit = pos.on_bar(90.0, Some(99.0), &rules);
        assert_eq!(exit.map(|e| e.0), Some(ExitReason::StopLoss));
    }

    #[test]
    fn trailing_stop_after_activation() {
        let rules = ExitRules {
            profit_target: 0.50,
            ..ExitRules::default()
        };
        let mut pos = sample_position(70.0);
        assert!(pos.on_bar(116.0, None, &rules).is_none());
        assert!(pos.trailing_armed);
        assert!(pos.on_bar(120.0, None, &rules).is_none());
        // floor = 120 * 0.9 = 108
        let (reason, price) = pos.on_bar(107.0, None, &rules).unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
        assert!((price - 107.0).abs() < f64::EPSILON);
    }

    #[test]
    fn trailing_not_armed_below_activation() {
        let rules = ExitRules::default();
        let mut pos = sample_position(70.0);
        assert!(pos.on_bar(110.0, None, &rules).is_none());
        assert!(pos.on_bar(98.0, None, &rules).is_none());
        assert!(!pos.trailing_armed);
    }

    #[test]
    fn break_ma_exit() {
        let rules = ExitRules::default();
        let mut pos = sample_position(70.0);
        let exit = pos.on_bar(99.0, Some(101.0), &rules);
        assert_eq!(exit, Some((ExitReason::BreakMa, 99.0)));
    }

    #[test]
    fn profit_target_exit() {
        let rules = ExitRules::default();
        let mut pos = sample_position(70.0);
        let exit = pos.on_bar(121.0, Some(105.0), &rules);
        assert_eq!(exit, Some((ExitReason::ProfitTarget, 121.0)));
    }

    #[test]
    fn hold_limits_by_tier() {
        let rules = ExitRules::default();
        assert_eq!(rules.max_hold(QualityTier::A), 60);
        assert_eq!(rules.max_hold(QualityTier::B), 40);
        assert_eq!(rules.max_hold(QualityTier::C), 20);
    }

    #[test]
    fn close_consumes_position() {
        let rules = ExitRules::default();
        let mut pos = sample_position(70.0);
        let (reason, price) = pos.on_bar(80.0, None, &rules).unwrap();
        let trade = pos.close(NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(), price, reason);
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.hold_days, 1);
        assert!((trade.return_pct - (-0.08)).abs() < 1e-9);
        assert!(!trade.is_win());
    }

    #[test]
    fn exit_reason_names() {
        assert_eq!(ExitReason::HoldPeriodExpired.to_string(), "HOLD_PERIOD_EXPIRED");
        assert!(ExitReason::StopLoss < ExitReason::TrailingStop);
    }
}
