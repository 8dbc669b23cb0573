//! File report adapter implementing ReportPort.
//!
//! Writes `summary.json` (metrics and run metadata) and `trades.csv` (one row
//! per closed trade) into the output directory.

use crate::domain::backtest::{BacktestRun, SkippedTicker};
use crate::domain::metrics::{RunMetrics, TickerResult};
use crate::domain::position::OpenPosition;
use crate::domain::error::RanktraderError;
use crate::ports::report_port::ReportPort;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

pub const SUMMARY_FILE: &str = "summary.json";
pub const TRADES_FILE: &str = "trades.csv";

pub struct FileReportAdapter;

#[derive(Serialize)]
struct RunSummary<'a> {
    generated_at: DateTime<Utc>,
    snapshot_count: usize,
    first_snapshot: Option<NaiveDate>,
    last_snapshot: Option<NaiveDate>,
    validation_warnings: usize,
    /// Serialised as `null` when infinite; see `no_losing_trades`.
    metrics: &'a RunMetrics,
    no_losing_trades: bool,
    ticker_results: &'a [TickerResult],
    skipped: &'a [SkippedTicker],
    open_at_end: &'a [OpenPosition],
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> RanktraderError {
    RanktraderError::Storage {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl FileReportAdapter {
    pub fn new() -> Self {
        FileReportAdapter
    }
}

impl Default for FileReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for FileReportAdapter {
    fn write(&self, run: &BacktestRun, output_dir: &Path) -> Result<(), RanktraderError> {
        fs::create_dir_all(output_dir).map_err(|e| storage_err(output_dir, e))?;

        let summary = RunSummary {
            generated_at: Utc::now(),
            snapshot_count: run.snapshot_dates.len(),
            first_snapshot: run.snapshot_dates.first().copied(),
            last_snapshot: run.snapshot_dates.last().copied(),
            validation_warnings: run.validation_warnings,
            metrics: &run.metrics,
            no_losing_trades: run.metrics.profit_factor.is_infinite(),
            ticker_results: &run.ticker_results,
            skipped: &run.skipped,
            open_at_end: &run.open_at_end,
        };
        let summary_path = output_dir.join(SUMMARY_FILE);
        let json =
            serde_json::to_string_pretty(&summary).map_err(|e| storage_err(&summary_path, e))?;
        fs::write(&summary_path, json).map_err(|e| storage_err(&summary_path, e))?;

        let trades_path = output_dir.join(TRADES_FILE);
        let mut writer = csv::Writer::from_path(&trades_path).map_err(|e| storage_err(&trades_path, e))?;
        for trade in &run.trades {
            writer
                .serialize(trade)
                .map_err(|e| storage_err(&trades_path, e))?;
        }
        writer.flush().map_err(|e| storage_err(&trades_path, e))?;

        info!(
            dir = %output_dir.display(),
            trades = run.trades.len(),
            "backtest report written"
        );
        Ok(())
    }
}
