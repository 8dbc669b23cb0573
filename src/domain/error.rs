//! Domain error types.

use chrono::NaiveDate;
use std::time::Duration;

/// A snapshot was used for a decision date that precedes its data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "look-ahead contamination for entry {entry_date}: {count} of {total} records use data from {}",
    format_dates(.offending_dates)
)]
pub struct ContaminationError {
    pub entry_date: NaiveDate,
    pub count: usize,
    pub total: usize,
    pub offending_dates: Vec<NaiveDate>,
}

fn format_dates(dates: &[NaiveDate]) -> String {
    dates
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure reported by an external scoring or data collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("no score for {ticker} as of {as_of}")]
    NotFound { ticker: String, as_of: NaiveDate },

    #[error("provider error: {0}")]
    Provider(String),
}

impl ScoreError {
    /// Rate limits and timeouts are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScoreError::RateLimited { .. } | ScoreError::Timeout(_))
    }
}

/// Top-level error type for ranktrader.
#[derive(Debug, thiserror::Error)]
pub enum RanktraderError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("storage error at {path}: {reason}")]
    Storage { path: String, reason: String },

    #[error("no data for {ticker}")]
    NoData { ticker: String },

    #[error("as-of date {as_of} is in the future (today is {today})")]
    FutureAsOf { as_of: NaiveDate, today: NaiveDate },

    #[error("universe is empty")]
    EmptyUniverse,

    #[error(transparent)]
    Contamination(#[from] ContaminationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&RanktraderError> for std::process::ExitCode {
    fn from(err: &RanktraderError) -> Self {
        let code: u8 = match err {
            RanktraderError::Io(_) | RanktraderError::Storage { .. } => 1,
            RanktraderError::ConfigParse { .. }
            | RanktraderError::ConfigMissing { .. }
            | RanktraderError::ConfigInvalid { .. } => 2,
            RanktraderError::Database { .. } | RanktraderError::DatabaseQuery { .. } => 3,
            RanktraderError::Contamination(_) => 4,
            RanktraderError::NoData { .. }
            | RanktraderError::EmptyUniverse
            | RanktraderError::FutureAsOf { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
