//! SQLite price history adapter.
//!
//! Bars for tickers, indices and volatility series share one `prices` table
//! keyed by `(ticker, date)`.

use crate::domain::error::RanktraderError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::PriceDataPort;
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> RanktraderError {
    RanktraderError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> RanktraderError {
    RanktraderError::DatabaseQuery {
        reason: e.to_string(),
    }
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, RanktraderError> {
        let db_path =
            config
                .get_string("data", "sqlite_path")
                .ok_or_else(|| RanktraderError::ConfigMissing {
                    section: "data".into(),
                    key: "sqlite_path".into(),
                })?;

        let pool_size = config.get_int("data", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, RanktraderError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, RanktraderError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), RanktraderError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS prices (
                    ticker TEXT NOT NULL,
                    date TEXT NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume INTEGER NOT NULL,
                    PRIMARY KEY (ticker, date)
                );
                CREATE INDEX IF NOT EXISTS idx_prices_date ON prices(date);",
            )
            .map_err(query_err)
    }

    pub fn insert_bars(&self, bars: &[OhlcvBar]) -> Result<(), RanktraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO prices (ticker, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    bar.ticker,
                    bar.date.format(DATE_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)
    }

    /// First date, last date and bar count for `ticker`.
    pub fn data_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, RanktraderError> {
        let result: (Option<String>, Option<String>, i64) = self
            .conn()?
            .query_row(
                "SELECT MIN(date), MAX(date), COUNT(*) FROM prices WHERE ticker = ?1",
                params![ticker],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(min_str), Some(max_str), count) if count > 0 => {
                let parse = |s: &str| {
                    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| RanktraderError::Database {
                        reason: e.to_string(),
                    })
                };
                Ok(Some((parse(&min_str)?, parse(&max_str)?, count as usize)))
            }
            _ => Ok(None),
        }
    }
}

impl PriceDataPort for SqliteAdapter {
    fn price_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, RanktraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, open, high, low, close, volume
                 FROM prices
                 WHERE ticker = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![
                    ticker,
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    let date_str: String = row.get(0)?;
                    let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    Ok(OhlcvBar {
                        ticker: ticker.to_string(),
                        date,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                    })
                },
            )
            .map_err(query_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn bar(ticker: &str, day: u32, close: f64) -> OhlcvBar {
        OhlcvBar {
            ticker: ticker.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000,
        }
    }

    fn seeded() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        adapter
            .insert_bars(&[bar("BHP", 1, 100.5), bar("BHP", 2, 101.5), bar("BHP", 5, 102.5), bar("SPY", 1, 480.0)])
            .unwrap();
        adapter
    }

    #[test]
    fn from_config_missing_path() {
        match SqliteAdapter::from_config(&EmptyConfig) {
            Err(RanktraderError::ConfigMissing { section, key }) => {
                assert_eq!(section, "data");
                assert_eq!(key, "sqlite_path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn price_history_returns_bars_in_range() {
        let adapter = seeded();
        let fetched = adapter
            .price_history(
                "BHP",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            )
            .unwrap();

        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].ticker, "BHP");
        assert_eq!(fetched[1].close, 101.5);
    }

    #[test]
    fn price_history_unknown_ticker_is_empty() {
        let adapter = seeded();
        let fetched = adapter
            .price_history(
                "XYZ",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .unwrap();
        assert!(fetched.is_empty());
    }

    #[test]
    fn insert_replaces_existing_bar() {
        let adapter = seeded();
        adapter.insert_bars(&[bar("BHP", 1, 99.0)]).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let fetched = adapter.price_history("BHP", day, day).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].close, 99.0);
    }

    #[test]
    fn data_range_reports_bounds() {
        let adapter = seeded();
        let (min, max, count) = adapter.data_range("BHP").unwrap().unwrap();
        assert_eq!(min, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(max, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(count, 3);
        assert!(adapter.data_range("XYZ").unwrap().is_none());
    }
}
