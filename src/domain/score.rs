//! Per-instrument score records and composite weighting.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Technical,
    Momentum,
    Fundamental,
}

impl Factor {
    pub const ALL: [Factor; 3] = [Factor::Technical, Factor::Momentum, Factor::Fundamental];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Technical => "technical",
            Factor::Momentum => "momentum",
            Factor::Fundamental => "fundamental",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed factor weights. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorWeights {
    pub technical: f64,
    pub momentum: f64,
    pub fundamental: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        FactorWeights {
            technical: 0.40,
            momentum: 0.30,
            fundamental: 0.30,
        }
    }
}

impl FactorWeights {
    pub fn weight(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Technical => self.technical,
            Factor::Momentum => self.momentum,
            Factor::Fundamental => self.fundamental,
        }
    }

    /// Weighted mean over the factors present in `scores`, renormalising the
    /// weights of the factors that were actually scored.
    pub fn combine(&self, scores: &BTreeMap<Factor, f64>) -> f64 {
        let total_weight: f64 = scores.keys().map(|f| self.weight(*f)).sum();
        if total_weight <= 0.0 {
            return MIN_SCORE;
        }
        let weighted: f64 = scores.iter().map(|(f, s)| self.weight(*f) * s).sum();
        clamp_score(weighted / total_weight)
    }
}

pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_SCORE;
    }
    value.clamp(MIN_SCORE, MAX_SCORE)
}

/// Quality tier derived from the composite score; governs maximum hold length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    A,
    B,
    C,
}

impl QualityTier {
    pub fn from_composite(composite: f64) -> Self {
        if composite >= 80.0 {
            QualityTier::A
        } else if composite >= 65.0 {
            QualityTier::B
        } else {
            QualityTier::C
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::A => f.write_str("A"),
            QualityTier::B => f.write_str("B"),
            QualityTier::C => f.write_str("C"),
        }
    }
}

/// One instrument's evaluation at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub ticker: String,
    pub component_scores: BTreeMap<Factor, f64>,
    pub composite_score: f64,
    /// `None` only for records read from snapshot files that predate the column.
    pub data_as_of_date: Option<NaiveDate>,
    pub score_generated_at: Option<DateTime<Utc>>,
}

impl ScoreRecord {
    pub fn component(&self, factor: Factor) -> Option<f64> {
        self.component_scores.get(&factor).copied()
    }

    pub fn quality_tier(&self) -> QualityTier {
        QualityTier::from_composite(self.composite_score)
    }

    pub fn has_provenance(&self) -> bool {
        self.data_as_of_date.is_some() && self.score_generated_at.is_some()
    }
}
