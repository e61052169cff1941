//! Market data provider contract and structured error types.
//!
//! The MarketDataProvider trait abstracts over upstream price feeds
//! (Polygon, synthetic data) so the market service can swap implementations
//! and tests can supply fixtures. The cache and retry layers sit above this
//! trait — providers don't know about either.

use crate::domain::{Bar, BarSeries};
use crate::session::MarketSession;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Structured error types for provider operations.
///
/// `is_retryable` drives the market service's retry policy: transient
/// network and upstream conditions are retried, contract violations and
/// unknown symbols are not.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status} from provider: {body}")]
    Http { status: u16, body: String },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("historical data requires exactly one ticker, got {0}")]
    MultipleTickers(usize),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
}

impl MarketDataError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketDataError::Unavailable(_)
                | MarketDataError::Network(_)
                | MarketDataError::RateLimited { .. }
                | MarketDataError::Http { .. }
        )
    }
}

/// Feature descriptor for runtime capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_historical: bool,
    pub granularity: Duration,
}

/// Latest-quote snapshot keyed by symbol. Not consulted during replay.
#[derive(Debug, Clone)]
pub struct QuoteSnapshot {
    pub quotes: BTreeMap<String, Bar>,
    pub timestamp: DateTime<Utc>,
}

impl QuoteSnapshot {
    pub fn get(&self, symbol: &str) -> Option<&Bar> {
        self.quotes.get(symbol)
    }
}

/// Trait for market data providers.
///
/// Historical fetches accept a symbol set for interface symmetry with the
/// realtime call but must receive exactly one symbol; the service fans out
/// per ticker so rate pacing stays accurate.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch minute bars for one symbol over `[start, end]`. Returned bars
    /// already satisfy OHLC sanity; out-of-session bars may be included and
    /// are filtered by the engine.
    fn fetch_historical(
        &self,
        symbols: &BTreeSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        session: MarketSession,
    ) -> Result<BarSeries, MarketDataError>;

    /// Fetch the latest quotes for a set of symbols.
    fn fetch_latest(&self, symbols: &BTreeSet<String>) -> Result<QuoteSnapshot, MarketDataError>;

    /// Cheap liveness probe.
    fn is_available(&self) -> bool;

    /// Maximum calls per minute; the service paces fetches with this.
    fn rate_limit(&self) -> u32;

    fn capabilities(&self) -> ProviderCapabilities;
}

/// Progress callbacks for multi-symbol initialization.
pub trait ProgressReporter: Send {
    fn on_batch_start(&self, _total: usize) {}
    fn on_cache_hit(&self, _symbol: &str) {}
    fn on_fetched(&self, _symbol: &str, _index: usize, _total: usize) {}
    fn on_retry(&self, _symbol: &str, _attempt: u32, _error: &MarketDataError) {}
    fn on_batch_complete(&self, _total: usize) {}
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl ProgressReporter for StdoutProgress {
    fn on_batch_start(&self, total: usize) {
        println!("Fetching historical data for {total} tickers");
    }

    fn on_cache_hit(&self, symbol: &str) {
        println!("Loaded cached data for {symbol}");
    }

    fn on_fetched(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Fetched data for {symbol}", index + 1, total);
    }

    fn on_retry(&self, symbol: &str, attempt: u32, error: &MarketDataError) {
        eprintln!("Fetch attempt {attempt} for {symbol} failed: {error}");
    }

    fn on_batch_complete(&self, total: usize) {
        println!("Historical data ready for {total} tickers");
    }
}

/// Progress reporter that says nothing.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {}
