//! Polygon.io market data provider.
//!
//! Fetches minute aggregates from the v2 aggs API. The free tier allows
//! five calls per minute, enforced locally with a token bucket so the
//! upstream never sees a burst it would 429.

use crate::data::provider::{
    MarketDataError, MarketDataProvider, ProviderCapabilities, QuoteSnapshot,
};
use crate::data::rate_limiter::RateLimiter;
use crate::domain::{Bar, BarSeries};
use crate::session::MarketSession;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Free-tier request budget, calls per minute.
const RATE_LIMIT_PER_MINUTE: u32 = 5;
const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

/// Polygon v2 aggregates response.
#[derive(Debug, Deserialize)]
struct AggsResponse {
    status: Option<String>,
    error: Option<String>,
    results: Option<Vec<AggBar>>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    /// Epoch milliseconds of the bar start.
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

/// Polygon v2 snapshot response.
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    tickers: Option<Vec<SnapshotTicker>>,
}

#[derive(Debug, Deserialize)]
struct SnapshotTicker {
    ticker: String,
    day: AggDay,
}

#[derive(Debug, Deserialize)]
struct AggDay {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

pub struct PolygonProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    rate_limiter: RateLimiter,
}

impl PolygonProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Point the provider at a different host (test servers).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("ticklab/0.1")
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            rate_limiter: RateLimiter::new(RATE_LIMIT_PER_MINUTE as f64 / 60.0),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, MarketDataError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| MarketDataError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(MarketDataError::RateLimited { retry_after_secs: retry_after });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(MarketDataError::Http { status: status.as_u16(), body });
        }

        response
            .json()
            .map_err(|e| MarketDataError::ResponseFormat(e.to_string()))
    }

    /// Convert an aggregates response into a validated bar series.
    fn parse_aggs(symbol: &str, response: AggsResponse) -> Result<BarSeries, MarketDataError> {
        if let Some(status) = &response.status {
            if status != "OK" && status != "DELAYED" {
                let detail = response.error.unwrap_or_default();
                return Err(MarketDataError::ResponseFormat(format!(
                    "polygon status {status}: {detail}"
                )));
            }
        }

        let results = response
            .results
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;

        let mut series = BarSeries::new(symbol);
        for agg in results {
            let Some(timestamp) = DateTime::from_timestamp_millis(agg.t) else {
                return Err(MarketDataError::ResponseFormat(format!(
                    "invalid timestamp: {}",
                    agg.t
                )));
            };
            let bar = Bar::new(symbol, timestamp, agg.o, agg.h, agg.l, agg.c, agg.v);
            if let Err(e) = bar.validate() {
                eprintln!("Skipping invalid bar for {symbol} at {timestamp}: {e}");
                continue;
            }
            let _ = series.insert(bar);
        }

        if series.is_empty() {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }
        Ok(series)
    }
}

impl MarketDataProvider for PolygonProvider {
    fn name(&self) -> &str {
        "polygon"
    }

    fn fetch_historical(
        &self,
        symbols: &BTreeSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _session: MarketSession,
    ) -> Result<BarSeries, MarketDataError> {
        if symbols.len() != 1 {
            return Err(MarketDataError::MultipleTickers(symbols.len()));
        }
        let symbol = symbols.iter().next().cloned().unwrap_or_default();

        self.rate_limiter.acquire(1.0);

        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/minute/{}/{}?adjusted=true&sort=asc&limit=50000&apiKey={}",
            self.base_url,
            symbol,
            start.timestamp_millis(),
            end.timestamp_millis(),
            self.api_key,
        );
        let response: AggsResponse = self.get_json(&url)?;
        Self::parse_aggs(&symbol, response)
    }

    fn fetch_latest(&self, symbols: &BTreeSet<String>) -> Result<QuoteSnapshot, MarketDataError> {
        self.rate_limiter.acquire(1.0);

        let joined = symbols.iter().cloned().collect::<Vec<_>>().join(",");
        let url = format!(
            "{}/v2/snapshot/locale/us/markets/stocks/tickers/{}?apiKey={}",
            self.base_url, joined, self.api_key,
        );
        let response: SnapshotResponse = self.get_json(&url)?;

        let timestamp = Utc::now();
        let mut quotes = BTreeMap::new();
        for ticker in response.tickers.unwrap_or_default() {
            let day = ticker.day;
            quotes.insert(
                ticker.ticker.clone(),
                Bar::new(ticker.ticker, timestamp, day.o, day.h, day.l, day.c, day.v),
            );
        }
        Ok(QuoteSnapshot { quotes, timestamp })
    }

    fn is_available(&self) -> bool {
        let url = format!("{}/v1/marketstatus/now?apiKey={}", self.base_url, self.api_key);
        match self.client.get(&url).send() {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn rate_limit(&self) -> u32 {
        RATE_LIMIT_PER_MINUTE
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { supports_historical: true, granularity: Duration::minutes(1) }
    }
}
