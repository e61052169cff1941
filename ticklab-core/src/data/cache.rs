//! Segmented Parquet cache for historical minute bars.
//!
//! Layout: `{cache_dir}/{SYMBOL}_{start}_to_{end}.parquet`, one file per
//! fetched window, keyed at day granularity. An in-memory per-symbol index
//! of segments serves lookups: a single covering segment wins, otherwise
//! contiguous overlapping segments are merged. Corrupt files are deleted on
//! read failure and refetched upstream. Writes are atomic (tmp + rename).

use crate::domain::{Bar, BarSeries};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("invalid cache data: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
struct Segment {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    path: PathBuf,
}

impl Segment {
    fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= start && self.end >= end
    }

    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.end >= start && self.start <= end
    }
}

/// Disk cache of bar segments with an in-memory interval index.
pub struct SegmentCache {
    cache_dir: PathBuf,
    index: Mutex<HashMap<String, BTreeMap<DateTime<Utc>, Segment>>>,
}

impl SegmentCache {
    /// Open (and create if needed) a cache directory, indexing any existing
    /// segment files found in it.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;

        let mut index: HashMap<String, BTreeMap<DateTime<Utc>, Segment>> = HashMap::new();
        for entry in fs::read_dir(&cache_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if let Some((symbol, segment)) = parse_segment_path(&path) {
                index.entry(symbol).or_default().insert(segment.start, segment);
            }
        }

        Ok(Self { cache_dir, index: Mutex::new(index) })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Serve `[start, end]` for `symbol` from cached segments, if covered.
    ///
    /// Unreadable segment files are deleted and dropped from the index so a
    /// later fetch can replace them.
    pub fn get(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<BarSeries> {
        let mut index = self.index.lock().unwrap();
        let segments = index.get_mut(symbol)?;

        // A single segment containing the whole range wins.
        if let Some(key) = segments
            .values()
            .find(|segment| segment.covers(start, end))
            .map(|segment| segment.start)
        {
            let segment = segments[&key].clone();
            match load_segment(symbol, &segment.path) {
                Ok(series) => return Some(series),
                Err(e) => {
                    eprintln!("Deleting corrupt cache file {}: {e}", segment.path.display());
                    let _ = fs::remove_file(&segment.path);
                    segments.remove(&key);
                }
            }
        }

        // Otherwise merge overlapping segments if they form a contiguous run.
        let overlapping: Vec<Segment> = segments
            .values()
            .filter(|segment| segment.overlaps(start, end))
            .cloned()
            .collect();
        if overlapping.is_empty() {
            return None;
        }

        let mut covered_to = overlapping[0].start;
        for segment in &overlapping {
            if segment.start > covered_to {
                return None; // gap in the cached data
            }
            covered_to = covered_to.max(segment.end);
        }
        if overlapping[0].start > start || covered_to < end {
            return None;
        }

        let mut merged = BarSeries::new(symbol);
        for segment in &overlapping {
            let series = match load_segment(symbol, &segment.path) {
                Ok(series) => series,
                Err(e) => {
                    eprintln!("Deleting corrupt cache file {}: {e}", segment.path.display());
                    let _ = fs::remove_file(&segment.path);
                    segments.remove(&segment.start);
                    return None;
                }
            };
            for bar in series.range(start, end) {
                let _ = merged.insert(bar);
            }
        }
        Some(merged)
    }

    /// Write a fetched window to disk and index it.
    pub fn put(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        series: &BarSeries,
    ) -> Result<(), CacheError> {
        let path = self.segment_path(symbol, start, end);
        let tmp_path = path.with_extension("parquet.tmp");

        let mut df = series_to_dataframe(series)?;
        let file = fs::File::create(&tmp_path)?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| CacheError::Parquet(format!("write parquet: {e}")))?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::Io(e)
        })?;

        let segment = Segment { start: widen_start(start), end: widen_end(end), path };
        self.index
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .insert(segment.start, segment);
        Ok(())
    }

    /// Delete every cached segment file and reset the index.
    pub fn clear(&self) -> Result<(), CacheError> {
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(path)?;
            }
        }
        self.index.lock().unwrap().clear();
        Ok(())
    }

    fn segment_path(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> PathBuf {
        let filename = format!(
            "{symbol}_{}_to_{}.parquet",
            start.date_naive().format("%Y-%m-%d"),
            end.date_naive().format("%Y-%m-%d"),
        );
        self.cache_dir.join(filename)
    }
}

/// Segment keys are day-granular: widen the stored bounds to whole days so
/// re-opened caches agree with freshly written ones.
fn widen_start(start: DateTime<Utc>) -> DateTime<Utc> {
    day_bounds(start.date_naive()).0
}

fn widen_end(end: DateTime<Utc>) -> DateTime<Utc> {
    day_bounds(end.date_naive()).1
}

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end = date.and_hms_opt(23, 59, 59).unwrap().and_utc();
    (start, end)
}

/// Parse `{SYMBOL}_{start}_to_{end}` out of a segment filename.
fn parse_segment_path(path: &Path) -> Option<(String, Segment)> {
    let stem = path.file_stem()?.to_str()?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 || parts[parts.len() - 2] != "to" {
        return None;
    }
    let end_date = NaiveDate::parse_from_str(parts[parts.len() - 1], "%Y-%m-%d").ok()?;
    let start_date = NaiveDate::parse_from_str(parts[parts.len() - 3], "%Y-%m-%d").ok()?;
    let symbol = parts[..parts.len() - 3].join("_");
    if symbol.is_empty() {
        return None;
    }

    let (start, _) = day_bounds(start_date);
    let (_, end) = day_bounds(end_date);
    Some((symbol, Segment { start, end, path: path.to_path_buf() }))
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn series_to_dataframe(series: &BarSeries) -> Result<DataFrame, CacheError> {
    let ts: Vec<i64> = series.iter().map(|b| b.timestamp.timestamp()).collect();
    let opens: Vec<f64> = series.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = series.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = series.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = series.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = series.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("ts".into(), ts),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| CacheError::Parquet(format!("dataframe creation: {e}")))
}

fn load_segment(symbol: &str, path: &Path) -> Result<BarSeries, CacheError> {
    let file = fs::File::open(path)?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| CacheError::Parquet(format!("read parquet: {e}")))?;

    if df.height() == 0 {
        return Err(CacheError::Invalid("empty segment file".into()));
    }
    for column in ["ts", "open", "high", "low", "close", "volume"] {
        if df.column(column).is_err() {
            return Err(CacheError::Invalid(format!("missing column '{column}'")));
        }
    }

    dataframe_to_series(symbol, &df)
}

fn dataframe_to_series(symbol: &str, df: &DataFrame) -> Result<BarSeries, CacheError> {
    let col = |name: &str| {
        df.column(name)
            .map_err(|e| CacheError::Parquet(format!("column read: {e}")))
    };
    let type_err = |name: &str, e: PolarsError| CacheError::Parquet(format!("{name} column type: {e}"));

    let ts = col("ts")?.i64().map_err(|e| type_err("ts", e))?;
    let opens = col("open")?.f64().map_err(|e| type_err("open", e))?;
    let highs = col("high")?.f64().map_err(|e| type_err("high", e))?;
    let lows = col("low")?.f64().map_err(|e| type_err("low", e))?;
    let closes = col("close")?.f64().map_err(|e| type_err("close", e))?;
    let volumes = col("volume")?.f64().map_err(|e| type_err("volume", e))?;

    let mut series = BarSeries::new(symbol);
    for i in 0..df.height() {
        let secs = ts
            .get(i)
            .ok_or_else(|| CacheError::Invalid(format!("null timestamp at row {i}")))?;
        let timestamp = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| CacheError::Invalid(format!("invalid timestamp: {secs}")))?;

        let bar = Bar::new(
            symbol,
            timestamp,
            opens.get(i).unwrap_or(f64::NAN),
            highs.get(i).unwrap_or(f64::NAN),
            lows.get(i).unwrap_or(f64::NAN),
            closes.get(i).unwrap_or(f64::NAN),
            volumes.get(i).unwrap_or(0.0),
        );
        series
            .insert(bar)
            .map_err(|e| CacheError::Invalid(e.to_string()))?;
    }
    Ok(series)
}
