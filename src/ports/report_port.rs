//! Backtest report port trait.

use crate::domain::backtest::BacktestRun;
use crate::domain::error::RanktraderError;
use std::path::Path;

/// Port for writing a run summary and trade ledger.
pub trait ReportPort {
    fn write(&self, run: &BacktestRun, output_dir: &Path) -> Result<(), RanktraderError>;
}
