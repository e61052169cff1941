//! Buy-and-hold: one sized entry per symbol, then nothing.

use super::Algorithm;
use crate::domain::{Bar, Portfolio};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Buys a fixed-dollar allocation of each target symbol the first time a
/// bar for it appears, then holds.
pub struct BuyAndHold {
    id: String,
    targets: BTreeSet<String>,
    held: BTreeSet<String>,
    allocation: f64,
}

impl BuyAndHold {
    pub fn new<S: Into<String>>(id: impl Into<String>, tickers: impl IntoIterator<Item = S>) -> Self {
        Self::with_allocation(id, tickers, 10_000.0)
    }

    /// Target dollar amount invested per symbol.
    pub fn with_allocation<S: Into<String>>(
        id: impl Into<String>,
        tickers: impl IntoIterator<Item = S>,
        allocation: f64,
    ) -> Self {
        Self {
            id: id.into(),
            targets: tickers.into_iter().map(Into::into).collect(),
            held: BTreeSet::new(),
            allocation,
        }
    }
}

impl Algorithm for BuyAndHold {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_update(
        &mut self,
        current_data: &BTreeMap<String, Bar>,
        _timestamp: DateTime<Utc>,
        portfolio: &mut Portfolio,
    ) {
        for symbol in &self.targets {
            if self.held.contains(symbol) {
                continue;
            }
            let Some(bar) = current_data.get(symbol) else {
                continue;
            };

            let quantity = (self.allocation / bar.close) as u32;
            if quantity == 0 {
                continue;
            }
            match portfolio.buy_stock(symbol, quantity, bar.close) {
                Ok(()) => {
                    self.held.insert(symbol.clone());
                }
                Err(e) => {
                    eprintln!("{}: could not enter {symbol}: {e}", self.id);
                }
            }
        }
    }
}
