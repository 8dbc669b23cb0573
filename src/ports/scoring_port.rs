//! Scoring collaborator port trait.
//!
//! Every call carries the as-of date explicitly. Implementations must only use
//! information available on or before that date; the look-ahead validator
//! checks the resulting snapshot downstream.

use crate::domain::error::ScoreError;
use crate::domain::score::Factor;
use chrono::NaiveDate;

pub trait ScoringPort {
    fn score_technical(&self, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError>;

    fn score_momentum(&self, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError>;

    fn score_fundamental(&self, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError>;

    fn score(&self, factor: Factor, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError> {
        match factor {
            Factor::Technical => self.score_technical(ticker, as_of),
            Factor::Momentum => self.score_momentum(ticker, as_of),
            Factor::Fundamental => self.score_fundamental(ticker, as_of),
        }
    }
}
