//! Timeline construction — merge per-ticker bar lists into one ordered
//! stream of minutes.

use super::BacktestError;
use crate::domain::Bar;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Total order on minute-truncated timestamps, each mapping to the bars
/// observed at that minute. A ticker may be missing at any given minute;
/// per-minute maps are ordered so iteration is deterministic.
#[derive(Debug, Clone)]
pub struct Timeline {
    points: BTreeMap<DateTime<Utc>, BTreeMap<String, Bar>>,
}

impl Timeline {
    /// Merge per-ticker bars. For each (minute, ticker) pair the first bar
    /// in that ticker's list wins. An empty result is a fatal error.
    pub fn build(data: &HashMap<String, Vec<Bar>>) -> Result<Self, BacktestError> {
        let mut points: BTreeMap<DateTime<Utc>, BTreeMap<String, Bar>> = BTreeMap::new();

        for (symbol, bars) in data {
            for bar in bars {
                points
                    .entry(bar.minute())
                    .or_default()
                    .entry(symbol.clone())
                    .or_insert_with(|| bar.clone());
            }
        }

        if points.is_empty() {
            return Err(BacktestError::EmptyTimeline);
        }
        Ok(Self { points })
    }

    pub fn first(&self) -> Option<(DateTime<Utc>, &BTreeMap<String, Bar>)> {
        self.points.iter().next().map(|(ts, bars)| (*ts, bars))
    }

    pub fn last(&self) -> Option<(DateTime<Utc>, &BTreeMap<String, Bar>)> {
        self.points.iter().next_back().map(|(ts, bars)| (*ts, bars))
    }

    pub fn get(&self, timestamp: DateTime<Utc>) -> Option<&BTreeMap<String, Bar>> {
        self.points.get(&timestamp)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.points.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, &BTreeMap<String, Bar>)> {
        self.points.iter().map(|(ts, bars)| (*ts, bars))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
