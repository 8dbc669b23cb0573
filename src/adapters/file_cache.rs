//! TTL-bounded file cache for expensive provider lookups.
//!
//! One JSON document per key under the cache directory. Writes go through a
//! temp file in the same directory and are renamed into place, so a reader
//! never sees a half-written entry. Unreadable entries are evicted and
//! reported as misses; they never surface as errors.

use crate::domain::error::{RanktraderError, ScoreError};
use crate::domain::score::Factor;
use crate::ports::scoring_port::ScoringPort;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    key: String,
    cached_at: DateTime<Utc>,
    ttl_secs: i64,
    payload: T,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.cached_at >= Duration::seconds(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    /// Corrupt entries removed on read or during cleanup.
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> RanktraderError {
    RanktraderError::Storage {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// File-system-safe, collision-free form of a cache key. ASCII alphanumerics,
/// `-` and `.` pass through; every other byte becomes `_XX` (upper-case hex),
/// `_` included, so distinct keys always map to distinct file names.
pub fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{byte:02X}"));
        }
    }
    out
}

impl FileCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>, ttl: Duration) -> Result<Self, RanktraderError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| storage_err(&dir, e))?;
        Ok(Self {
            dir,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at<T: DeserializeOwned>(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(%key, error = %e, "cache read failed, treating as miss");
                }
                return self.miss();
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, error = %e, "corrupt cache entry, evicting");
                self.evict(&path);
                return self.miss();
            }
        };

        if entry.key != key {
            debug!(%key, stored = %entry.key, "cache key collision");
            return self.miss();
        }
        if entry.is_expired(now) {
            debug!(%key, cached_at = %entry.cached_at, "cache entry expired");
            return self.miss();
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.payload)
    }

    fn miss<T>(&self) -> Option<T> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn evict(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to evict cache entry"),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, payload: &T) -> Result<(), RanktraderError> {
        self.set_with_ttl_at(key, payload, self.ttl, Utc::now())
    }

    pub fn set_at<T: Serialize>(
        &self,
        key: &str,
        payload: &T,
        now: DateTime<Utc>,
    ) -> Result<(), RanktraderError> {
        self.set_with_ttl_at(key, payload, self.ttl, now)
    }

    pub fn set_with_ttl_at<T: Serialize>(
        &self,
        key: &str,
        payload: &T,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), RanktraderError> {
        let path = self.entry_path(key);
        let entry = CacheEntry {
            key: key.to_string(),
            cached_at: now,
            ttl_secs: ttl.num_seconds(),
            payload,
        };
        let json = serde_json::to_vec(&entry).map_err(|e| storage_err(&path, e))?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| storage_err(&self.dir, e))?;
        tmp.write_all(&json).map_err(|e| storage_err(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| storage_err(&path, e.error))?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(%key, "cache write");
        Ok(())
    }

    /// Remove `key`. Returns whether an entry existed.
    pub fn invalidate(&self, key: &str) -> Result<bool, RanktraderError> {
        let path = self.entry_path(key);
        let existed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(storage_err(&path, e)),
        };
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(existed)
    }

    pub fn cleanup_expired(&self) -> Result<usize, RanktraderError> {
        self.cleanup_expired_at(Utc::now())
    }

    /// Physically delete entries expired at `now`. Corrupt entries are
    /// evicted as well but not included in the returned count.
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<usize, RanktraderError> {
        let mut removed = 0usize;
        for path in self.entry_files()? {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<CacheEntry<serde_json::Value>>(&content) {
                Ok(entry) if entry.is_expired(now) => {
                    fs::remove_file(&path).map_err(|e| storage_err(&path, e))?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(_) => self.evict(&path),
            }
        }
        if removed > 0 {
            debug!(removed, "expired cache entries removed");
        }
        Ok(removed)
    }

    /// Entries that would be removed by a cleanup at `now`. Read-only.
    pub fn expired_count_at(&self, now: DateTime<Utc>) -> Result<usize, RanktraderError> {
        Ok(self
            .entry_files()?
            .iter()
            .filter_map(|path| fs::read_to_string(path).ok())
            .filter_map(|content| {
                serde_json::from_str::<CacheEntry<serde_json::Value>>(&content).ok()
            })
            .filter(|entry| entry.is_expired(now))
            .count())
    }

    /// Delete every entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize, RanktraderError> {
        let files = self.entry_files()?;
        for path in &files {
            fs::remove_file(path).map_err(|e| storage_err(path, e))?;
        }
        Ok(files.len())
    }

    /// Number of entry files on disk, expired or not.
    pub fn len(&self) -> Result<usize, RanktraderError> {
        Ok(self.entry_files()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, RanktraderError> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, RanktraderError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| storage_err(&self.dir, e))?;
        Ok(entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect())
    }
}

/// Scorer decorator that serves selected factors from a [`FileCache`].
pub struct CachingScorer<'a> {
    inner: &'a (dyn ScoringPort + Sync),
    cache: &'a FileCache,
    cached_factors: Vec<Factor>,
}

impl<'a> CachingScorer<'a> {
    /// Caches the fundamental factor only.
    pub fn new(inner: &'a (dyn ScoringPort + Sync), cache: &'a FileCache) -> Self {
        Self::with_factors(inner, cache, vec![Factor::Fundamental])
    }

    pub fn with_factors(
        inner: &'a (dyn ScoringPort + Sync),
        cache: &'a FileCache,
        cached_factors: Vec<Factor>,
    ) -> Self {
        Self {
            inner,
            cache,
            cached_factors,
        }
    }

    pub fn cache_key(factor: Factor, ticker: &str, as_of: NaiveDate) -> String {
        format!("{factor}:{ticker}:{as_of}")
    }

    fn lookup(&self, factor: Factor, ticker: &str, as_of: NaiveDate) -> Result<f64, ScoreError> {
        if !self.cached_factors.contains(&factor) {
            return self.inner.score(factor, ticker, as_of);
        }

        let key = Self::cache_key(factor, ticker, as_of);
        if let Some(score) = self.cache.get::<f64>(&key) {
            return Ok(score);
        }

        let score = self.inner.score(factor, ticker, as_of)?;
        if let Err(e) = self.cache.set(&key, &score) {
            warn!(%key, error = %e, "failed to cache score");
        }
        Ok(score)
    }
}

impl ScoringPort for CachingScorer<'_> {
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
