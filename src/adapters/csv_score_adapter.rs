//! File-backed scoring collaborator.
//!
//! Reads `{dir}/{factor}.csv` files with a `ticker,date,score` header. A
//! lookup returns the latest score dated on or before the as-of date, so a
//! score published after the decision date is never visible.

use crate::domain::error::{RanktraderError, ScoreError};
use crate::domain::score::Factor;
use crate::ports::scoring_port::ScoringPort;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ScoreRow {
    ticker: String,
    date: NaiveDate,
    score: f64,
}

/// Per-ticker score history, ascending by date.
type FactorScores = HashMap<String, Vec<(NaiveDate, f64)>>;

pub struct CsvScoreAdapter {
    scores: HashMap<Factor, FactorScores>,
}

impl CsvScoreAdapter {
    /// Load every factor file under `dir`. A missing factor file leaves that
    /// factor empty; every lookup for it reports `NotFound`.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, RanktraderError> {
        let dir = dir.into();
        let mut scores = HashMap::new();
        for factor in Factor::ALL {
            let path = dir.join(format!("{factor}.csv"));
            let by_ticker = read_factor_file(&path)?;
            debug!(%factor, tickers = by_ticker.len(), "score file loaded");
            scores.insert(factor, by_ticker);
        }
        info!(dir = %dir.display(), "score files loaded");
        Ok(Self { scores })
    }

    /// Tickers with at least one score for `factor`, sorted.
    pub fn tickers(&self, factor: Factor) -> Vec<String> {
        let mut tickers: Vec<String> = self
            .scores
            .get(&factor)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        tickers.sort();
        tickers
    }

    fn lookup(&self, factor: Factor, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError> {
        let not_found = || ScoreError::NotFound {
            ticker: ticker.to_string(),
            as_of,
        };
        let history = self
            .scores
            .get(&factor)
            .and_then(|m| m.get(ticker))
            .ok_or_else(not_found)?;

        let visible = history.partition_point(|(date, _)| *date <= as_of);
        if visible == 0 {
            return Err(not_found());
        }
        Ok(history[visible - 1].1)
    }
}

fn read_factor_file(path: &Path) -> Result<FactorScores, RanktraderError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no score file");
            return Ok(HashMap::new());
        }
        Err(e) => {
            return Err(RanktraderError::Storage {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        }
    };

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let mut by_ticker: FactorScores = HashMap::new();
    for result in rdr.deserialize::<ScoreRow>() {
        let row = result.map_err(|e| RanktraderError::DatabaseQuery {
            reason: format!("{}: {}", path.display(), e),
        })?;
        by_ticker
            .entry(row.ticker)
            .or_default()
            .push((row.date, row.score));
    }
    for history in by_ticker.values_mut() {
        history.sort_by_key(|(date, _)| *date);
    }
    Ok(by_ticker)
}

impl ScoringPort for CsvScoreAdapter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (TempDir, CsvScoreAdapter) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("momentum.csv"),
            "ticker,date,score\n\
             AAPL,2025-08-15,74.0\n\
             AAPL,2025-08-01,61.5\n\
             MSFT,2025-08-08,55.0\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("fundamental.csv"),
            "ticker,date,score\nAAPL,2025-07-01,80.0\n",
        )
        .unwrap();
        let adapter = CsvScoreAdapter::load(dir.path()).unwrap();
        (dir, adapter)
    }

    #[test]
    fn returns_latest_score_on_or_before_as_of() {
        let (_dir, adapter) = setup();
        assert_eq!(adapter.score_momentum("AAPL", date(2025, 8, 15)), Ok(74.0));
        assert_eq!(adapter.score_momentum("AAPL", date(2025, 8, 14)), Ok(61.5));
        assert_eq!(adapter.score_fundamental("AAPL", date(2025, 12, 31)), Ok(80.0));
    }

    #[test]
    fn nothing_visible_before_first_score() {
        let (_dir, adapter) = setup();
        assert!(matches!(
            adapter.score_momentum("AAPL", date(2025, 7, 31)),
            Err(ScoreError::NotFound { .. })
        ));
    }

    #[test]
    fn missing_factor_file_is_not_found() {
        let (_dir, adapter) = setup();
        let err = adapter.score_technical("AAPL", date(2025, 8, 15)).unwrap_err();
        assert!(!err.is_retryable());
        assert!(adapter.tickers(Factor::Technical).is_empty());
    }

    #[test]
    fn lists_tickers_per_factor() {
        let (_dir, adapter) = setup();
        assert_eq!(adapter.tickers(Factor::Momentum), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn malformed_score_is_error() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("technical.csv"),
            "ticker,date,score\nAAPL,2025-08-15,high\n",
        )
        .unwrap();
        assert!(matches!(
            CsvScoreAdapter::load(dir.path()),
            Err(RanktraderError::DatabaseQuery { .. })
        ));
    }
}
