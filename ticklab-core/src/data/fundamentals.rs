//! Fundamentals sidecar — earnings, ratios, income statements, news.
//!
//! Read-only companion for strategies; never on the replay hot path. Each
//! dataset has its own 24-hour JSON cache on disk, and every accessor
//! filters records to publish/report timestamps strictly before the
//! client's as-of instant so a backtest cannot look ahead.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const BASE_URL: &str = "https://www.alphavantage.co/query";
const CACHE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

const EARNINGS_CACHE: &str = "earnings_cache.json";
const METRICS_CACHE: &str = "metrics_cache.json";
const INCOME_CACHE: &str = "income_cache.json";
const SENTIMENT_CACHE: &str = "sentiment_cache.json";

#[derive(Debug, Error)]
pub enum FundamentalsError {
    #[error("fundamentals I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {0} from fundamentals API")]
    Http(u16),

    #[error("unexpected response shape: {0}")]
    ResponseFormat(String),
}

/// One scheduled or reported earnings call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub symbol: String,
    pub company_name: String,
    pub report_date: DateTime<Utc>,
    pub fiscal_date_ending: String,
}

/// Headline financial ratios from the company overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialRatios {
    pub symbol: String,
    pub pe_ratio: f64,
    pub profit_margin: f64,
    pub operating_margin: f64,
    pub return_on_equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarterlyReport {
    pub report_date: DateTime<Utc>,
    pub total_revenue: f64,
    pub gross_profit: f64,
    pub net_income: f64,
    pub operating_income: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub symbol: String,
    pub quarterly: Vec<QuarterlyReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSentiment {
    pub ticker: String,
    pub relevance_score: f64,
    pub sentiment_score: f64,
    pub sentiment_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSentiment {
    pub title: String,
    pub url: String,
    pub published: DateTime<Utc>,
    pub authors: Vec<String>,
    pub summary: String,
    pub source: String,
    pub overall_sentiment_score: f64,
    pub overall_sentiment_label: String,
    pub ticker_sentiments: Vec<TickerSentiment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<T> {
    data: T,
    timestamp_ms: i64,
}

impl<T> CacheEntry<T> {
    fn fresh(data: T) -> Self {
        Self { data, timestamp_ms: Utc::now().timestamp_millis() }
    }

    fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() - self.timestamp_ms > CACHE_TTL_MS
    }
}

/// Fundamentals client pinned to an as-of instant.
pub struct FundamentalsClient {
    api_key: String,
    cache_dir: PathBuf,
    as_of: DateTime<Utc>,
    client: reqwest::blocking::Client,
    earnings: Mutex<HashMap<String, CacheEntry<Vec<EarningsEvent>>>>,
    metrics: Mutex<HashMap<String, CacheEntry<FinancialRatios>>>,
    income: Mutex<HashMap<String, CacheEntry<IncomeStatement>>>,
    sentiment: Mutex<HashMap<String, CacheEntry<Vec<NewsSentiment>>>>,
}

impl FundamentalsClient {
    pub fn new(
        api_key: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        as_of: DateTime<Utc>,
    ) -> Result<Self, FundamentalsError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Ok(Self {
            api_key: api_key.into(),
            earnings: Mutex::new(load_cache(&cache_dir.join(EARNINGS_CACHE))),
            metrics: Mutex::new(load_cache(&cache_dir.join(METRICS_CACHE))),
            income: Mutex::new(load_cache(&cache_dir.join(INCOME_CACHE))),
            sentiment: Mutex::new(load_cache(&cache_dir.join(SENTIMENT_CACHE))),
            cache_dir,
            as_of,
            client,
        })
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    /// Earnings calls reported strictly before the as-of instant.
    pub fn earnings_events(&self, symbol: &str) -> Result<Vec<EarningsEvent>, FundamentalsError> {
        {
            let cache = self.earnings.lock().unwrap();
            if let Some(entry) = cache.get(symbol) {
                if !entry.is_expired() {
                    return Ok(self.filter_earnings(&entry.data));
                }
            }
        }

        let events = self.fetch_earnings(symbol)?;
        self.earnings
            .lock()
            .unwrap()
            .insert(symbol.to_string(), CacheEntry::fresh(events.clone()));
        self.persist(EARNINGS_CACHE, &self.earnings);
        Ok(self.filter_earnings(&events))
    }

    /// Headline ratios; point-in-time data, served as fetched.
    pub fn financial_ratios(&self, symbol: &str) -> Result<FinancialRatios, FundamentalsError> {
        {
            let cache = self.metrics.lock().unwrap();
            if let Some(entry) = cache.get(symbol) {
                if !entry.is_expired() {
                    return Ok(entry.data.clone());
                }
            }
        }

        let ratios = self.fetch_ratios(symbol)?;
        self.metrics
            .lock()
            .unwrap()
            .insert(symbol.to_string(), CacheEntry::fresh(ratios.clone()));
        self.persist(METRICS_CACHE, &self.metrics);
        Ok(ratios)
    }

    /// Quarterly income reports dated strictly before the as-of instant.
    pub fn quarterly_income(&self, symbol: &str) -> Result<IncomeStatement, FundamentalsError> {
        {
            let cache = self.income.lock().unwrap();
            if let Some(entry) = cache.get(symbol) {
                if !entry.is_expired() {
                    return Ok(self.filter_income(&entry.data));
                }
            }
        }

        let statement = self.fetch_income(symbol)?;
        self.income
            .lock()
            .unwrap()
            .insert(symbol.to_string(), CacheEntry::fresh(statement.clone()));
        self.persist(INCOME_CACHE, &self.income);
        Ok(self.filter_income(&statement))
    }

    /// News articles published strictly before the as-of instant.
    pub fn news_sentiments(&self, symbol: &str) -> Result<Vec<NewsSentiment>, FundamentalsError> {
        {
            let cache = self.sentiment.lock().unwrap();
            if let Some(entry) = cache.get(symbol) {
                if !entry.is_expired() {
                    return Ok(self.filter_news(&entry.data));
                }
            }
        }

        let articles = self.fetch_sentiment(symbol)?;
        self.sentiment
            .lock()
            .unwrap()
            .insert(symbol.to_string(), CacheEntry::fresh(articles.clone()));
        self.persist(SENTIMENT_CACHE, &self.sentiment);
        Ok(self.filter_news(&articles))
    }

    fn filter_earnings(&self, events: &[EarningsEvent]) -> Vec<EarningsEvent> {
        events.iter().filter(|e| e.report_date < self.as_of).cloned().collect()
    }

    fn filter_income(&self, statement: &IncomeStatement) -> IncomeStatement {
        IncomeStatement {
            symbol: statement.symbol.clone(),
            quarterly: statement
                .quarterly
                .iter()
                .filter(|q| q.report_date < self.as_of)
                .cloned()
                .collect(),
        }
    }

    fn filter_news(&self, articles: &[NewsSentiment]) -> Vec<NewsSentiment> {
        articles.iter().filter(|n| n.published < self.as_of).cloned().collect()
    }

    // ── Upstream fetches ────────────────────────────────────────────

    fn get_text(&self, url: &str) -> Result<String, FundamentalsError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FundamentalsError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FundamentalsError::Http(status.as_u16()));
        }
        response.text().map_err(|e| FundamentalsError::Network(e.to_string()))
    }

    /// EARNINGS_CALENDAR returns CSV: symbol,name,reportDate,fiscalDateEnding,...
    fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsEvent>, FundamentalsError> {
        let url = format!(
            "{BASE_URL}?function=EARNINGS_CALENDAR&symbol={symbol}&horizon=12month&apikey={}",
            self.api_key
        );
        let body = self.get_text(&url)?;

        let mut events = Vec::new();
        for line in body.lines().skip(1) {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 4 {
                continue;
            }
            let Ok(date) = NaiveDate::parse_from_str(fields[2].trim(), "%Y-%m-%d") else {
                continue;
            };
            let report_date = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
            events.push(EarningsEvent {
                symbol: fields[0].trim().to_string(),
                company_name: fields[1].trim().to_string(),
                report_date,
                fiscal_date_ending: fields[3].trim().to_string(),
            });
        }
        Ok(events)
    }

    fn fetch_ratios(&self, symbol: &str) -> Result<FinancialRatios, FundamentalsError> {
        let url = format!("{BASE_URL}?function=OVERVIEW&symbol={symbol}&apikey={}", self.api_key);
        let body = self.get_text(&url)?;
        let root: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| FundamentalsError::ResponseFormat(e.to_string()))?;

        let field = |name: &str| -> Result<f64, FundamentalsError> {
            root.get(name)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| FundamentalsError::ResponseFormat(format!("missing field {name}")))
        };

        Ok(FinancialRatios {
            symbol: symbol.to_string(),
            pe_ratio: field("PERatio")?,
            profit_margin: field("ProfitMargin")?,
            operating_margin: field("OperatingMarginTTM")?,
            return_on_equity: field("ReturnOnEquityTTM")?,
        })
    }

    fn fetch_income(&self, symbol: &str) -> Result<IncomeStatement, FundamentalsError> {
        let url = format!(
            "{BASE_URL}?function=INCOME_STATEMENT&symbol={symbol}&apikey={}",
            self.api_key
        );
        let body = self.get_text(&url)?;
        let root: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| FundamentalsError::ResponseFormat(e.to_string()))?;

        let reports = root
            .get("quarterlyReports")
            .and_then(|v| v.as_array())
            .ok_or_else(|| FundamentalsError::ResponseFormat("missing quarterlyReports".into()))?;

        let number = |report: &serde_json::Value, name: &str| {
            report
                .get(name)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0)
        };

        let mut quarterly = Vec::new();
        for report in reports {
            let Some(date) = report
                .get("fiscalDateEnding")
                .and_then(|v| v.as_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            else {
                continue;
            };
            quarterly.push(QuarterlyReport {
                report_date: date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
                total_revenue: number(report, "totalRevenue"),
                gross_profit: number(report, "grossProfit"),
                net_income: number(report, "netIncome"),
                operating_income: number(report, "operatingIncome"),
            });
        }
        Ok(IncomeStatement { symbol: symbol.to_string(), quarterly })
    }

    fn fetch_sentiment(&self, symbol: &str) -> Result<Vec<NewsSentiment>, FundamentalsError> {
        let url = format!(
            "{BASE_URL}?function=NEWS_SENTIMENT&tickers={symbol}&apikey={}",
            self.api_key
        );
        let body = self.get_text(&url)?;
        let root: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| FundamentalsError::ResponseFormat(e.to_string()))?;

        let feed = root
            .get("feed")
            .and_then(|v| v.as_array())
            .ok_or_else(|| FundamentalsError::ResponseFormat("missing feed".into()))?;

        let text = |v: &serde_json::Value, name: &str| {
            v.get(name).and_then(|f| f.as_str()).unwrap_or_default().to_string()
        };

        let mut articles = Vec::new();
        for article in feed {
            let Some(published) = article
                .get("time_published")
                .and_then(|v| v.as_str())
                .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S").ok())
            else {
                continue;
            };

            let ticker_sentiments = article
                .get("ticker_sentiment")
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| TickerSentiment {
                            ticker: text(entry, "ticker"),
                            relevance_score: number_field(entry, "relevance_score"),
                            sentiment_score: number_field(entry, "ticker_sentiment_score"),
                            sentiment_label: text(entry, "ticker_sentiment_label"),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let authors = article
                .get("authors")
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|a| a.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            articles.push(NewsSentiment {
                title: text(article, "title"),
                url: text(article, "url"),
                published: published.and_utc(),
                authors,
                summary: text(article, "summary"),
                source: text(article, "source"),
                overall_sentiment_score: number_field(article, "overall_sentiment_score"),
                overall_sentiment_label: text(article, "overall_sentiment_label"),
                ticker_sentiments,
            });
        }
        Ok(articles)
    }

    /// Best-effort persistence; a failed write costs a refetch, never the run.
    fn persist<T: Serialize>(&self, filename: &str, cache: &Mutex<HashMap<String, CacheEntry<T>>>) {
        let path = self.cache_dir.join(filename);
        let snapshot = cache.lock().unwrap();
        match serde_json::to_string_pretty(&*snapshot) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    eprintln!("Failed to persist {}: {e}", path.display());
                }
            }
            Err(e) => eprintln!("Failed to serialize {}: {e}", path.display()),
        }
    }
}

fn number_field(v: &serde_json::Value, name: &str) -> f64 {
    match v.get(name) {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Load a cache file, tolerating absence and corruption (start empty).
fn load_cache<T: DeserializeOwned>(path: &Path) -> HashMap<String, CacheEntry<T>> {
    let Ok(content) = fs::read_to_string(path) else {
        return HashMap::new();
    };
    match serde_json::from_str(&content) {
        Ok(map) => map,
        Err(e) => {
            eprintln!("Ignoring unreadable cache {}: {e}", path.display());
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn client_with_as_of(dir: &Path, as_of: DateTime<Utc>) -> FundamentalsClient {
        FundamentalsClient::new("demo", dir, as_of).unwrap()
    }

    fn event(day: u32) -> EarningsEvent {
        EarningsEvent {
            symbol: "TSLA".into(),
            company_name: "Tesla Inc".into(),
            report_date: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            fiscal_date_ending: "2023-12-31".into(),
        }
    }

    #[test]
    fn as_of_filter_excludes_future_records() {
        let dir = TempDir::new().unwrap();
        let as_of = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let client = client_with_as_of(dir.path(), as_of);

        let filtered = client.filter_earnings(&[event(5), event(10), event(15)]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].report_date, Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn cache_roundtrips_through_disk() {
        let dir = TempDir::new().unwrap();
        let as_of = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        {
            let client = client_with_as_of(dir.path(), as_of);
            client
                .earnings
                .lock()
                .unwrap()
                .insert("TSLA".into(), CacheEntry::fresh(vec![event(5)]));
            client.persist(EARNINGS_CACHE, &client.earnings);
        }

        let reopened = client_with_as_of(dir.path(), as_of);
        let cache = reopened.earnings.lock().unwrap();
        let entry = cache.get("TSLA").expect("persisted entry should load");
        assert_eq!(entry.data.len(), 1);
        assert!(!entry.is_expired());
    }

    #[test]
    fn corrupt_cache_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(EARNINGS_CACHE), b"{ not json").unwrap();

        let client = client_with_as_of(dir.path(), Utc::now());
        assert!(client.earnings.lock().unwrap().is_empty());
    }

    #[test]
    fn expired_entries_are_detected() {
        let entry = CacheEntry {
            data: vec![event(5)],
            timestamp_ms: Utc::now().timestamp_millis() - CACHE_TTL_MS - 1,
        };
        assert!(entry.is_expired());
    }

    #[test]
    fn income_filter_drops_future_quarters() {
        let dir = TempDir::new().unwrap();
        let as_of = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let client = client_with_as_of(dir.path(), as_of);

        let statement = IncomeStatement {
            symbol: "TSLA".into(),
            quarterly: vec![
                QuarterlyReport {
                    report_date: Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap(),
                    total_revenue: 1.0,
                    gross_profit: 1.0,
                    net_income: 1.0,
                    operating_income: 1.0,
                },
                QuarterlyReport {
                    report_date: Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(),
                    total_revenue: 2.0,
                    gross_profit: 2.0,
                    net_income: 2.0,
                    operating_income: 2.0,
                },
            ],
        };
        let filtered = client.filter_income(&statement);
        assert_eq!(filtered.quarterly.len(), 1);
    }
}
