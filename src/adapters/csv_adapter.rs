//! CSV price history adapter.
//!
//! One file per ticker, `{base}/{TICKER}.csv`, with a
//! `date,open,high,low,close,volume` header. Index and volatility series are
//! stored the same way under their identifiers.

use crate::domain::error::RanktraderError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::PriceDataPort;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: i64,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{ticker}.csv"))
    }

    /// Tickers with a price file, sorted.
    pub fn list_tickers(&self) -> Result<Vec<String>, RanktraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| RanktraderError::Database {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut tickers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RanktraderError::Database {
                reason: format!("directory entry error: {e}"),
            })?;
            let name = entry.file_name();
            if let Some(ticker) = name.to_string_lossy().strip_suffix(".csv") {
                tickers.push(ticker.to_string());
            }
        }
        tickers.sort();
        Ok(tickers)
    }
}

impl PriceDataPort for CsvAdapter {
    fn price_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, RanktraderError> {
        let path = self.csv_path(ticker);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RanktraderError::NoData {
                ticker: ticker.to_string(),
            },
            _ => RanktraderError::Database {
                reason: format!("failed to read {}: {}", path.display(), e),
            },
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.deserialize::<PriceRow>() {
            let row = result.map_err(|e| RanktraderError::DatabaseQuery {
                reason: format!("{}: {}", path.display(), e),
            })?;
            if row.date < start || row.date > end {
                continue;
            }
            bars.push(OhlcvBar {
                ticker: ticker.to_string(),
                date: row.date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}
