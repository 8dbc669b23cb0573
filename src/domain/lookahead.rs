//! Look-ahead validation for snapshot/decision-date pairs.
//!
//! A snapshot may only drive an entry decision when none of its data is newer
//! than the decision date. This check runs before any trade is opened.

use crate::domain::error::ContaminationError;
use crate::domain::snapshot::Snapshot;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub checked: usize,
    /// Tickers whose records lack provenance timestamps.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Check that `snapshot` carries no data dated after `entry_date`.
///
/// The snapshot's own date counts for every record that lacks a
/// `data_as_of_date`, so a snapshot dated after the entry fails even when its
/// records are unannotated.
pub fn validate(
    snapshot: &Snapshot,
    entry_date: NaiveDate,
) -> Result<ValidationReport, ContaminationError> {
    let snapshot_date = snapshot.data_as_of_date();
    let mut offending = BTreeSet::new();
    let mut count = 0usize;
    let mut warnings = Vec::new();

    for record in snapshot.records() {
        if !record.has_provenance() {
            warn!(
                ticker = %record.ticker,
                %snapshot_date,
                "score record missing provenance timestamps"
            );
            warnings.push(record.ticker.clone());
        }

        let data_date = record.data_as_of_date.unwrap_or(snapshot_date);
        let effective = data_date.max(snapshot_date);
        if effective > entry_date {
            count += 1;
            offending.insert(effective);
        }
    }

    if snapshot.records().is_empty() && snapshot_date > entry_date {
        offending.insert(snapshot_date);
    }

    if !offending.is_empty() {
        return Err(ContaminationError {
            entry_date,
            count,
            total: snapshot.records().len(),
            offending_dates: offending.into_iter().collect(),
        });
    }

    Ok(ValidationReport {
        checked: snapshot.records().len(),
        warnings,
    })
}
