//! Snapshot persistence port trait.

use crate::domain::error::RanktraderError;
use crate::domain::snapshot::Snapshot;
use chrono::NaiveDate;

pub trait SnapshotPort {
    /// Persist a snapshot keyed by its `data_as_of_date`, replacing any prior one.
    fn save(&self, snapshot: &Snapshot) -> Result<(), RanktraderError>;

    fn load(&self, as_of: NaiveDate) -> Result<Option<Snapshot>, RanktraderError>;

    /// All stored snapshot dates, ascending.
    fn list_dates(&self) -> Result<Vec<NaiveDate>, RanktraderError>;

    /// Every snapshot dated within `[start, end]`, ascending.
    fn load_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Snapshot>, RanktraderError> {
        let mut snapshots = Vec::new();
        for date in self.list_dates()? {
            if date < start || date > end {
                continue;
            }
            if let Some(snapshot) = self.load(date)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }
}
