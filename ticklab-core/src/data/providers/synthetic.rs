//! Synthetic market data provider.
//!
//! Generates a deterministic per-symbol random-walk of minute bars for
//! in-session minutes only. The walk is seeded from the provider seed and
//! the symbol name, so the same configuration always replays identically
//! regardless of fetch order. Used by tests and the demo binary; no API
//! key, no rate limit.

use crate::data::provider::{
    MarketDataError, MarketDataProvider, ProviderCapabilities, QuoteSnapshot,
};
use crate::domain::{Bar, BarSeries};
use crate::session::MarketSession;
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

pub struct SyntheticProvider {
    seed: u64,
    /// Per-minute close drift bound, in dollars.
    volatility: f64,
}

impl SyntheticProvider {
    pub fn new(seed: u64) -> Self {
        Self { seed, volatility: 0.25 }
    }

    pub fn with_volatility(seed: u64, volatility: f64) -> Self {
        Self { seed, volatility }
    }

    fn symbol_seed(&self, symbol: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        self.seed ^ hasher.finish()
    }

    /// Starting price in [20, 420), stable per symbol.
    fn base_price(&self, symbol: &str) -> f64 {
        20.0 + (self.symbol_seed(symbol) % 400) as f64
    }

    fn generate(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        session: MarketSession,
    ) -> BarSeries {
        let mut rng = StdRng::seed_from_u64(self.symbol_seed(symbol));
        let mut price = self.base_price(symbol);
        let mut series = BarSeries::new(symbol);

        let mut minute = start
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(start);
        while minute <= end {
            if session.is_open_at(minute, false) {
                let open = price;
                let close = (open + rng.gen_range(-self.volatility..self.volatility)).max(0.01);
                let spread = rng.gen_range(0.0..self.volatility / 2.0);
                let high = open.max(close) + spread;
                let low = (open.min(close) - spread).max(0.01);
                let volume = rng.gen_range(1_000.0..50_000.0);

                // Inserting same-symbol bars cannot fail.
                let _ = series.insert(Bar::new(symbol, minute, open, high, low, close, volume));
                price = close;
            }
            minute += Duration::minutes(1);
        }
        series
    }
}

impl MarketDataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch_historical(
        &self,
        symbols: &BTreeSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        session: MarketSession,
    ) -> Result<BarSeries, MarketDataError> {
        if symbols.len() != 1 {
            return Err(MarketDataError::MultipleTickers(symbols.len()));
        }
        let symbol = symbols.iter().next().cloned().unwrap_or_default();
        Ok(self.generate(&symbol, start, end, session))
    }

    fn fetch_latest(&self, symbols: &BTreeSet<String>) -> Result<QuoteSnapshot, MarketDataError> {
        let timestamp = Utc::now();
        let mut quotes = BTreeMap::new();
        for symbol in symbols {
            let series = self.generate(
                symbol,
                timestamp - Duration::days(1),
                timestamp,
                MarketSession::Nyse,
            );
            if let Some(bar) = series.last() {
                quotes.insert(symbol.clone(), bar.clone());
            }
        }
        Ok(QuoteSnapshot { quotes, timestamp })
    }

    fn is_available(&self) -> bool {
        true
    }

    fn rate_limit(&self) -> u32 {
        u32::MAX // local generation, no pacing needed
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { supports_historical: true, granularity: Duration::minutes(1) }
    }
}
