//! CSV snapshot store.
//!
//! Each snapshot is `{dir}/{YYYY-MM-DD}.csv` (one row per scored instrument)
//! plus a `{YYYY-MM-DD}.meta.json` sidecar holding the regime reading and
//! coverage. Both files are written through a temp file and renamed.

use crate::domain::error::RanktraderError;
use crate::domain::regime::{RegimeLabel, RegimeState};
use crate::domain::score::{Factor, ScoreRecord};
use crate::domain::snapshot::{Coverage, Snapshot};
use crate::ports::snapshot_port::SnapshotPort;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct CsvSnapshotStore {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    ticker: String,
    technical: Option<f64>,
    momentum: Option<f64>,
    fundamental: Option<f64>,
    composite_score: f64,
    #[serde(default)]
    data_as_of_date: Option<NaiveDate>,
    #[serde(default)]
    score_generated_at: Option<DateTime<Utc>>,
}

impl From<&ScoreRecord> for SnapshotRow {
    fn from(record: &ScoreRecord) -> Self {
        SnapshotRow {
            ticker: record.ticker.clone(),
            technical: record.component(Factor::Technical),
            momentum: record.component(Factor::Momentum),
            fundamental: record.component(Factor::Fundamental),
            composite_score: record.composite_score,
            data_as_of_date: record.data_as_of_date,
            score_generated_at: record.score_generated_at,
        }
    }
}

impl From<SnapshotRow> for ScoreRecord {
    fn from(row: SnapshotRow) -> Self {
        let component_scores: BTreeMap<Factor, f64> = [
            (Factor::Technical, row.technical),
            (Factor::Momentum, row.momentum),
            (Factor::Fundamental, row.fundamental),
        ]
        .into_iter()
        .filter_map(|(factor, score)| score.map(|s| (factor, s)))
        .collect();

        ScoreRecord {
            ticker: row.ticker,
            component_scores,
            composite_score: row.composite_score,
            data_as_of_date: row.data_as_of_date,
            score_generated_at: row.score_generated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    data_as_of_date: NaiveDate,
    regime: RegimeState,
    coverage: Coverage,
    technical_included: bool,
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> RanktraderError {
    RanktraderError::Storage {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl CsvSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RanktraderError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| storage_err(&dir, e))?;
        Ok(Self { dir })
    }

    fn csv_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.csv", date.format(DATE_FORMAT)))
    }

    fn meta_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.meta.json", date.format(DATE_FORMAT)))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), RanktraderError> {
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| storage_err(&self.dir, e))?;
        tmp.write_all(bytes).map_err(|e| storage_err(path, e))?;
        tmp.persist(path).map_err(|e| storage_err(path, e.error))?;
        Ok(())
    }

    fn read_meta(&self, date: NaiveDate) -> Result<Option<SnapshotMeta>, RanktraderError> {
        let path = self.meta_path(date);
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| storage_err(&path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(&path, e)),
        }
    }
}

impl SnapshotPort for CsvSnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), RanktraderError> {
        let date = snapshot.data_as_of_date();
        let path = self.csv_path(date);

        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in snapshot.records() {
            writer
                .serialize(SnapshotRow::from(record))
                .map_err(|e| storage_err(&path, e))?;
        }
        let bytes = writer.into_inner().map_err(|e| storage_err(&path, e))?;
        self.write_atomic(&path, &bytes)?;

        let meta = SnapshotMeta {
            data_as_of_date: date,
            regime: snapshot.regime().clone(),
            coverage: snapshot.coverage().clone(),
            technical_included: snapshot.technical_included(),
        };
        let meta_path = self.meta_path(date);
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| storage_err(&meta_path, e))?;
        self.write_atomic(&meta_path, &json)?;

        info!(%date, records = snapshot.records().len(), path = %path.display(), "snapshot saved");
        Ok(())
    }

    fn load(&self, as_of: NaiveDate) -> Result<Option<Snapshot>, RanktraderError> {
        let path = self.csv_path(as_of);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(&path, e)),
        };

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let records = rdr
            .deserialize::<SnapshotRow>()
            .map(|row| row.map(ScoreRecord::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_err(&path, e))?;

        let snapshot = match self.read_meta(as_of)? {
            Some(meta) => Snapshot::from_parts(
                meta.data_as_of_date,
                records,
                meta.regime,
                meta.coverage,
                meta.technical_included,
            ),
            None => {
                warn!(%as_of, "snapshot metadata missing, assuming neutral regime");
                let technical_included = records
                    .iter()
                    .any(|r| r.component(Factor::Technical).is_some());
                let coverage = Coverage {
                    requested: records.len(),
                    scored: records.len(),
                    failed: Vec::new(),
                };
                Snapshot::from_parts(
                    as_of,
                    records,
                    RegimeState::new(as_of, RegimeLabel::ConfirmedUptrend),
                    coverage,
                    technical_included,
                )
            }
        };
        debug!(%as_of, records = snapshot.records().len(), "snapshot loaded");
        Ok(Some(snapshot))
    }

    fn list_dates(&self) -> Result<Vec<NaiveDate>, RanktraderError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(&self.dir, e)),
        };

        let mut dates: Vec<NaiveDate> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let stem = name.strip_suffix(".csv")?;
                NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
            })
            .collect();
        dates.sort();
        Ok(dates)
    }
}
