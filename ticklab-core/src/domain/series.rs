//! Time-indexed bar series for a single symbol.
//!
//! Backs the historical cache and the timeline builder. Range queries are
//! inclusive on both ends; percentage change uses floor lookups so callers
//! can ask about any instant, not just exact bar timestamps.

use super::bar::Bar;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Ordered minute-bar series owned by exactly one symbol.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    symbol: String,
    points: BTreeMap<DateTime<Utc>, Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into(), points: BTreeMap::new() }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Insert a bar, keyed by its timestamp. The bar's symbol must match.
    pub fn insert(&mut self, bar: Bar) -> Result<(), SeriesError> {
        if bar.symbol != self.symbol {
            return Err(SeriesError::SymbolMismatch {
                series: self.symbol.clone(),
                bar: bar.symbol,
            });
        }
        self.points.insert(bar.timestamp, bar);
        Ok(())
    }

    /// All bars with `start <= timestamp <= end`, in time order.
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Bar> {
        if start > end {
            return Vec::new();
        }
        self.points.range(start..=end).map(|(_, bar)| bar.clone()).collect()
    }

    /// Percentage change in close between the bars at-or-before `from` and
    /// at-or-before `to`.
    pub fn percent_change(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<f64, SeriesError> {
        let past = self.floor(from).ok_or(SeriesError::InsufficientData { at: from })?;
        let current = self.floor(to).ok_or(SeriesError::InsufficientData { at: to })?;
        Ok((current.close - past.close) / past.close * 100.0)
    }

    /// The bar at or immediately before `at`, if any.
    pub fn floor(&self, at: DateTime<Utc>) -> Option<&Bar> {
        self.points.range(..=at).next_back().map(|(_, bar)| bar)
    }

    pub fn first(&self) -> Option<&Bar> {
        self.points.values().next()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.points.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.points.values()
    }
}

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("bar symbol '{bar}' does not match series symbol '{series}'")]
    SymbolMismatch { series: String, bar: String },

    #[error("no bar at or before {at}")]
    InsufficientData { at: DateTime<Utc> },
}
