//! Historical market service.
//!
//! Owns the provider, the segmented disk cache, and the in-memory hot
//! cache. All upstream calls run on one dedicated worker thread fed by an
//! mpsc channel, which serializes provider traffic and keeps rate pacing
//! accurate no matter how many callers there are. Reads after
//! initialization are served from the hot cache on the calling thread.

use crate::data::cache::{CacheError, SegmentCache};
use crate::data::provider::{
    MarketDataError, MarketDataProvider, ProgressReporter, StdoutProgress,
};
use crate::domain::{Bar, BarSeries};
use crate::session::MarketSession;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on graceful shutdown before in-flight work is abandoned.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("market service not initialized")]
    NotInitialized,

    #[error("market service worker is gone")]
    WorkerGone,

    #[error("no historical data available for {0}")]
    MissingData(String),

    #[error("failed to fetch historical data for {symbol}: {source}")]
    Fetch {
        symbol: String,
        #[source]
        source: MarketDataError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Tunables for the service.
pub struct ServiceOptions {
    /// Attempts per ticker before the backtest is failed.
    pub max_retries: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Directory for the segmented disk cache; `None` disables persistence.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(5000),
            cache_dir: None,
        }
    }
}

enum Command {
    Initialize {
        symbols: BTreeSet<String>,
        previous_days: i64,
        session: MarketSession,
        reply: Sender<Result<(), ServiceError>>,
    },
    Shutdown {
        done: Sender<()>,
    },
}

/// Deterministic replay source: fetch once (with retries, pacing, and disk
/// caching), then serve every range query from memory.
pub struct HistoricalMarketService {
    hot: Arc<RwLock<HashMap<String, BarSeries>>>,
    cache: Option<Arc<SegmentCache>>,
    initialized: Arc<AtomicBool>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl HistoricalMarketService {
    /// Create a service with stdout progress reporting.
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        options: ServiceOptions,
    ) -> Result<Self, ServiceError> {
        Self::with_reporter(provider, options, Box::new(StdoutProgress))
    }

    pub fn with_reporter(
        provider: Arc<dyn MarketDataProvider>,
        options: ServiceOptions,
        reporter: Box<dyn ProgressReporter>,
    ) -> Result<Self, ServiceError> {
        let cache = match &options.cache_dir {
            Some(dir) => Some(Arc::new(SegmentCache::new(dir)?)),
            None => None,
        };
        let hot: Arc<RwLock<HashMap<String, BarSeries>>> = Arc::new(RwLock::new(HashMap::new()));
        let initialized = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::channel();
        let worker = {
            let hot = Arc::clone(&hot);
            let cache = cache.clone();
            let initialized = Arc::clone(&initialized);
            thread::Builder::new()
                .name("ticklab-market-service".into())
                .spawn(move || {
                    worker_loop(rx, provider, hot, cache, initialized, options, reporter);
                })
                .map_err(|_| ServiceError::WorkerGone)?
        };

        Ok(Self { hot, cache, initialized, commands: tx, worker: Some(worker) })
    }

    /// Fetch `[now - previous_days, now]` for every ticker, disk cache
    /// first, provider with retry second. Blocks until the worker finishes.
    /// A no-op once a prior call has succeeded.
    pub fn initialize(
        &self,
        symbols: &BTreeSet<String>,
        previous_days: i64,
        session: MarketSession,
    ) -> Result<(), ServiceError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(Command::Initialize {
                symbols: symbols.clone(),
                previous_days,
                session,
                reply: reply_tx,
            })
            .map_err(|_| ServiceError::WorkerGone)?;
        reply_rx.recv().map_err(|_| ServiceError::WorkerGone)?
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Bars per ticker within `[start, end]`, from the hot cache with a
    /// disk-cache fallback.
    pub fn fetch_historical(
        &self,
        symbols: &BTreeSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<Bar>>, ServiceError> {
        if !self.is_initialized() {
            return Err(ServiceError::NotInitialized);
        }

        let mut result = HashMap::new();
        let mut misses = Vec::new();
        {
            let hot = self.hot.read().unwrap();
            for symbol in symbols {
                match hot.get(symbol) {
                    Some(series) => {
                        result.insert(symbol.clone(), series.range(start, end));
                    }
                    None => misses.push(symbol.clone()),
                }
            }
        }

        for symbol in misses {
            let series = self
                .cache
                .as_ref()
                .and_then(|cache| cache.get(&symbol, start, end))
                .ok_or_else(|| ServiceError::MissingData(symbol.clone()))?;
            result.insert(symbol.clone(), series.range(start, end));
            self.hot.write().unwrap().insert(symbol, series);
        }

        Ok(result)
    }

    /// Graceful shutdown: drain the worker within `SHUTDOWN_TIMEOUT`, then
    /// abandon any in-flight provider request.
    pub fn close(mut self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.commands.send(Command::Shutdown { done: done_tx }).is_ok()
            && done_rx.recv_timeout(SHUTDOWN_TIMEOUT).is_ok()
        {
            if let Some(handle) = self.worker.take() {
                let _ = handle.join();
            }
        }
        // On timeout the worker is detached when the handle drops.
    }
}

fn worker_loop(
    rx: Receiver<Command>,
    provider: Arc<dyn MarketDataProvider>,
    hot: Arc<RwLock<HashMap<String, BarSeries>>>,
    cache: Option<Arc<SegmentCache>>,
    initialized: Arc<AtomicBool>,
    options: ServiceOptions,
    reporter: Box<dyn ProgressReporter>,
) {
    loop {
        match rx.recv() {
            Ok(Command::Initialize { symbols, previous_days, session, reply }) => {
                let result = if initialized.load(Ordering::Acquire) {
                    Ok(())
                } else {
                    let outcome = run_initialize(
                        provider.as_ref(),
                        &hot,
                        cache.as_deref(),
                        &options,
                        &symbols,
                        previous_days,
                        session,
                        reporter.as_ref(),
                    );
                    if outcome.is_ok() {
                        initialized.store(true, Ordering::Release);
                    }
                    outcome
                };
                let _ = reply.send(result);
            }
            Ok(Command::Shutdown { done }) => {
                let _ = done.send(());
                break;
            }
            Err(_) => break, // service dropped
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_initialize(
    provider: &dyn MarketDataProvider,
    hot: &RwLock<HashMap<String, BarSeries>>,
    cache: Option<&SegmentCache>,
    options: &ServiceOptions,
    symbols: &BTreeSet<String>,
    previous_days: i64,
    session: MarketSession,
    reporter: &dyn ProgressReporter,
) -> Result<(), ServiceError> {
    let end = Utc::now();
    let start = end - ChronoDuration::days(previous_days);
    let total = symbols.len();
    reporter.on_batch_start(total);

    for (index, symbol) in symbols.iter().enumerate() {
        if let Some(cache) = cache {
            if let Some(series) = cache.get(symbol, start, end) {
                hot.write().unwrap().insert(symbol.clone(), series);
                reporter.on_cache_hit(symbol);
                continue;
            }
        }

        let series = fetch_with_retry(provider, options, symbol, start, end, session, reporter)?;

        if let Some(cache) = cache {
            if let Err(e) = cache.put(symbol, start, end, &series) {
                eprintln!("Failed to cache data for {symbol}: {e}");
            }
        }
        hot.write().unwrap().insert(symbol.clone(), series);
        reporter.on_fetched(symbol, index, total);

        // Pace upstream calls to the provider's advertised rate limit.
        if index + 1 < total {
            let rate = provider.rate_limit().max(1);
            thread::sleep(Duration::from_secs_f64(60.0 / rate as f64));
        }
    }

    reporter.on_batch_complete(total);
    Ok(())
}

fn fetch_with_retry(
    provider: &dyn MarketDataProvider,
    options: &ServiceOptions,
    symbol: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    session: MarketSession,
    reporter: &dyn ProgressReporter,
) -> Result<BarSeries, ServiceError> {
    let single = BTreeSet::from([symbol.to_string()]);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let outcome = if provider.is_available() {
            provider.fetch_historical(&single, start, end, session)
        } else {
            Err(MarketDataError::Unavailable(provider.name().to_string()))
        };

        match outcome {
            Ok(series) => return Ok(series),
            Err(e) if e.is_retryable() && attempts < options.max_retries => {
                reporter.on_retry(symbol, attempts, &e);
                thread::sleep(options.retry_backoff * attempts);
            }
            Err(e) => {
                return Err(ServiceError::Fetch { symbol: symbol.to_string(), source: e })
            }
        }
    }
}
