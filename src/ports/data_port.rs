//! Price history port trait.

use crate::domain::error::RanktraderError;
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;

pub trait PriceDataPort {
    /// Daily bars for `ticker` in `[start, end]`, sorted by date ascending.
    fn price_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, RanktraderError>;

    /// Daily series for a broad-market index or volatility index.
    fn benchmark_index_series(
        &self,
        index_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, RanktraderError> {
        self.price_history(index_id, start, end)
    }
}
