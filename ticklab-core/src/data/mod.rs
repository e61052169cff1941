//! Data pipeline — providers, rate limiting, the segmented disk cache, the
//! historical market service, and the fundamentals sidecar.

pub mod cache;
pub mod fundamentals;
pub mod provider;
pub mod providers;
pub mod rate_limiter;
pub mod service;

pub use cache::{CacheError, SegmentCache};
pub use fundamentals::{
    EarningsEvent, FinancialRatios, FundamentalsClient, FundamentalsError, IncomeStatement,
    NewsSentiment, QuarterlyReport, TickerSentiment,
};
pub use provider::{
    MarketDataError, MarketDataProvider, ProgressReporter, ProviderCapabilities, QuoteSnapshot,
    SilentProgress, StdoutProgress,
};
pub use providers::{PolygonProvider, SyntheticProvider};
pub use rate_limiter::RateLimiter;
pub use service::{HistoricalMarketService, ServiceError, ServiceOptions};
