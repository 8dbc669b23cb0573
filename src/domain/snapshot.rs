//! Point-in-time snapshots and the generator that builds them.
//!
//! A [`Snapshot`] is the scored universe as of one date. It is built once by
//! [`SnapshotGenerator`] and never mutated afterwards: its fields are private
//! and only exposed through accessors.

use crate::domain::error::{RanktraderError, ScoreError};
use crate::domain::regime::{RegimeDetector, RegimeState};
use crate::domain::retry::RetryPolicy;
use crate::domain::score::{clamp_score, Factor, FactorWeights, ScoreRecord};
use crate::ports::scoring_port::ScoringPort;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub requested: usize,
    pub scored: usize,
    pub failed: Vec<String>,
}

impl Coverage {
    pub fn percent(&self) -> f64 {
        if self.requested == 0 {
            return 0.0;
        }
        self.scored as f64 / self.requested as f64 * 100.0
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    data_as_of_date: NaiveDate,
    records: Vec<ScoreRecord>,
    regime: RegimeState,
    coverage: Coverage,
    technical_included: bool,
}

impl Snapshot {
    /// Assemble a snapshot from already-scored parts. Records are ordered by
    /// descending composite score, ties by ticker.
    pub fn from_parts(
        data_as_of_date: NaiveDate,
        mut records: Vec<ScoreRecord>,
        regime: RegimeState,
        coverage: Coverage,
        technical_included: bool,
    ) -> Self {
        records.sort_by(|a, b| {
            b.composite_score
                .total_cmp(&a.composite_score)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });
        Snapshot {
            data_as_of_date,
            records,
            regime,
            coverage,
            technical_included,
        }
    }

    pub fn data_as_of_date(&self) -> NaiveDate {
        self.data_as_of_date
    }

    pub fn records(&self) -> &[ScoreRecord] {
        &self.records
    }

    pub fn regime(&self) -> &RegimeState {
        &self.regime
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    pub fn technical_included(&self) -> bool {
        self.technical_included
    }

    pub fn get(&self, ticker: &str) -> Option<&ScoreRecord> {
        self.records.iter().find(|r| r.ticker == ticker)
    }

    /// Records whose composite score meets `threshold`, best first.
    pub fn candidates(&self, threshold: f64) -> impl Iterator<Item = &ScoreRecord> {
        self.records
            .iter()
            .filter(move |r| r.composite_score >= threshold)
    }
}

/// The N weekly dates ending at `end` (inclusive), oldest first.
pub fn weekly_dates(end: NaiveDate, periods: usize) -> Vec<NaiveDate> {
    (0..periods)
        .rev()
        .map(|k| end - Duration::weeks(k as i64))
        .collect()
}

/// Sort and deduplicate an explicit date list.
pub fn normalize_dates(dates: &[NaiveDate]) -> Vec<NaiveDate> {
    dates.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub weights: FactorWeights,
    pub retry: RetryPolicy,
    /// Worker pool size; keep below the provider's request ceiling.
    pub max_concurrency: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            weights: FactorWeights::default(),
            retry: RetryPolicy::default(),
            max_concurrency: 4,
        }
    }
}

enum TickerOutcome {
    Scored(ScoreRecord),
    Failed { ticker: String, error: ScoreError },
}

pub struct SnapshotGenerator<'a> {
    scorer: &'a (dyn ScoringPort + Sync),
    regime: RegimeDetector<'a>,
    config: GeneratorConfig,
    pool: rayon::ThreadPool,
}

impl<'a> SnapshotGenerator<'a> {
    pub fn new(
        scorer: &'a (dyn ScoringPort + Sync),
        regime: RegimeDetector<'a>,
        config: GeneratorConfig,
    ) -> Result<Self, RanktraderError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency.max(1))
            .thread_name(|i| format!("ranktrader-score-{i}"))
            .build()
            .map_err(|e| RanktraderError::ConfigInvalid {
                section: "generator".into(),
                key: "max_concurrency".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            scorer,
            regime,
            config,
            pool,
        })
    }

    /// Score `universe` as of `as_of`. Instruments that fail scoring are
    /// dropped and recorded in the snapshot's coverage.
    pub fn generate_snapshot(
        &self,
        as_of: NaiveDate,
        universe: &[String],
        include_technical: bool,
    ) -> Result<Snapshot, RanktraderError> {
        self.generate_snapshot_at(as_of, universe, include_technical, Utc::now())
    }

    pub fn generate_snapshot_at(
        &self,
        as_of: NaiveDate,
        universe: &[String],
        include_technical: bool,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, RanktraderError> {
        let today = now.date_naive();
        if as_of > today {
            return Err(RanktraderError::FutureAsOf { as_of, today });
        }
        if universe.is_empty() {
            return Err(RanktraderError::EmptyUniverse);
        }

        let regime = self.regime.compute_regime(as_of);
        info!(
            %as_of,
            regime = %regime.label,
            adjustment = regime.score_adjustment,
            instruments = universe.len(),
            "generating snapshot"
        );

        let factors: Vec<Factor> = Factor::ALL
            .into_iter()
            .filter(|f| include_technical || *f != Factor::Technical)
            .collect();

        let scorer = self.scorer;
        let config = &self.config;
        let outcomes: Vec<TickerOutcome> = self.pool.install(|| {
            universe
                .par_iter()
                .map(|ticker| score_ticker(scorer, config, ticker, as_of, &factors, &regime, now))
                .collect()
        });

        let mut records = Vec::with_capacity(outcomes.len());
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                TickerOutcome::Scored(record) => records.push(record),
                TickerOutcome::Failed { ticker, error } => {
                    warn!(%ticker, %as_of, %error, "instrument failed scoring, excluded from snapshot");
                    failed.push(ticker);
                }
            }
        }

        let coverage = Coverage {
            requested: universe.len(),
            scored: records.len(),
            failed,
        };
        if coverage.is_partial() {
            warn!(
                %as_of,
                coverage_pct = coverage.percent(),
                failed = coverage.failed.len(),
                "partial snapshot"
            );
        }

        Ok(Snapshot::from_parts(
            as_of,
            records,
            regime,
            coverage,
            include_technical,
        ))
    }

    /// Sequential generation across `dates`, oldest first.
    pub fn generate_range(
        &self,
        dates: &[NaiveDate],
        universe: &[String],
        include_technical: bool,
    ) -> Result<Vec<Snapshot>, RanktraderError> {
        let mut snapshots = Vec::with_capacity(dates.len());
        self.generate_range_with(dates, universe, include_technical, |snapshot| {
            snapshots.push(snapshot);
            Ok(())
        })?;
        Ok(snapshots)
    }

    /// Like [`generate_range`](Self::generate_range), handing each snapshot to
    /// `on_snapshot` as soon as it is built. Stops at the first error from
    /// either side. Returns the number of snapshots produced.
    pub fn generate_range_with<F>(
        &self,
        dates: &[NaiveDate],
        universe: &[String],
        include_technical: bool,
        mut on_snapshot: F,
    ) -> Result<usize, RanktraderError>
    where
        F: FnMut(Snapshot) -> Result<(), RanktraderError>,
    {
        let dates = normalize_dates(dates);
        for date in &dates {
            on_snapshot(self.generate_snapshot(*date, universe, include_technical)?)?;
        }
        Ok(dates.len())
    }
}

fn score_ticker(
    scorer: &(dyn ScoringPort + Sync),
    config: &GeneratorConfig,
    ticker: &str,
    as_of: NaiveDate,
    factors: &[Factor],
    regime: &RegimeState,
    now: DateTime<Utc>,
) -> TickerOutcome {
    let mut component_scores = BTreeMap::new();

    for factor in factors {
        let label = format!("{factor}:{ticker}");
        let raw = match config
            .retry
            .run(&label, || scorer.score(*factor, ticker, as_of))
        {
            Ok(score) => score,
            Err(error) => {
                return TickerOutcome::Failed {
                    ticker: ticker.to_string(),
                    error,
                };
            }
        };
        let score = clamp_score(raw);
        if score != raw {
            warn!(%ticker, %factor, raw, "score outside [0, 100], clamped");
        }
        component_scores.insert(*factor, score);
    }

    let base = config.weights.combine(&component_scores);
    let composite_score = clamp_score(base + regime.score_adjustment);

    TickerOutcome::Scored(ScoreRecord {
        ticker: ticker.to_string(),
        component_scores,
        composite_score,
        data_as_of_date: Some(as_of),
        score_generated_at: Some(now),
    })
}
