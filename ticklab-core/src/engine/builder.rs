//! Backtest configuration builder.
//!
//! Collects tickers, window, interval, session rules, and strategies, then
//! validates, initializes the market service, and runs the engine.

use super::backtest::{BacktestEngine, BacktestResults};
use super::BacktestError;
use crate::data::provider::{MarketDataProvider, SilentProgress, StdoutProgress};
use crate::data::service::{HistoricalMarketService, ServiceOptions};
use crate::session::MarketSession;
use crate::strategy::Algorithm;
use chrono::Duration;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

pub struct BacktestBuilder {
    tickers: BTreeSet<String>,
    previous_days: i64,
    interval: Option<Duration>,
    session: MarketSession,
    run_on_market_closed: bool,
    auto_liquidate_on_finish: bool,
    should_print: bool,
    max_retries: u32,
    cache_dir: Option<PathBuf>,
    provider: Option<Arc<dyn MarketDataProvider>>,
    service: Option<HistoricalMarketService>,
    algorithms: Vec<(Box<dyn Algorithm>, f64)>,
}

impl Default for BacktestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BacktestBuilder {
    pub fn new() -> Self {
        Self {
            tickers: BTreeSet::new(),
            previous_days: 30,
            interval: None,
            session: MarketSession::Nyse,
            run_on_market_closed: false,
            auto_liquidate_on_finish: false,
            should_print: true,
            max_retries: 3,
            cache_dir: None,
            provider: None,
            service: None,
            algorithms: Vec::new(),
        }
    }

    pub fn with_stocks<S: Into<String>>(mut self, tickers: impl IntoIterator<Item = S>) -> Self {
        self.tickers.extend(tickers.into_iter().map(Into::into));
        self
    }

    pub fn with_previous_days(mut self, days: i64) -> Self {
        self.previous_days = days;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_market(mut self, session: MarketSession) -> Self {
        self.session = session;
        self
    }

    pub fn with_run_on_market_closed(mut self, run_on_market_closed: bool) -> Self {
        self.run_on_market_closed = run_on_market_closed;
        self
    }

    pub fn with_auto_liquidate_on_finish(mut self, auto_liquidate: bool) -> Self {
        self.auto_liquidate_on_finish = auto_liquidate;
        self
    }

    pub fn with_should_print(mut self, should_print: bool) -> Self {
        self.should_print = should_print;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Persist fetched bars under this directory between runs.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Use a raw provider; the builder wraps it in a market service.
    pub fn with_provider(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use an already-constructed (possibly pre-initialized) market service.
    pub fn with_service(mut self, service: HistoricalMarketService) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_algorithm(
        mut self,
        algorithm: impl Algorithm + 'static,
        initial_capital: f64,
    ) -> Self {
        self.algorithms.push((Box::new(algorithm), initial_capital));
        self
    }

    /// Validate, initialize the market service, and run the replay.
    pub fn run(self) -> Result<BacktestResults, BacktestError> {
        if self.tickers.is_empty() {
            return Err(BacktestError::Config(
                "at least one stock ticker must be specified".into(),
            ));
        }
        if self.algorithms.is_empty() {
            return Err(BacktestError::Config(
                "at least one algorithm must be specified".into(),
            ));
        }
        if self.previous_days <= 0 {
            return Err(BacktestError::Config("previous days must be positive".into()));
        }
        let interval = self
            .interval
            .ok_or_else(|| BacktestError::Config("interval must be specified".into()))?;
        if interval < Duration::minutes(1) {
            return Err(BacktestError::Config("interval must be at least one minute".into()));
        }

        let service = match (self.service, self.provider) {
            (Some(service), _) => service,
            (None, Some(provider)) => {
                let options = ServiceOptions {
                    max_retries: self.max_retries,
                    cache_dir: self.cache_dir,
                    ..ServiceOptions::default()
                };
                if self.should_print {
                    HistoricalMarketService::with_reporter(
                        provider,
                        options,
                        Box::new(StdoutProgress),
                    )?
                } else {
                    HistoricalMarketService::with_reporter(
                        provider,
                        options,
                        Box::new(SilentProgress),
                    )?
                }
            }
            (None, None) => {
                return Err(BacktestError::Config(
                    "a market data provider must be specified".into(),
                ))
            }
        };

        if !service.is_initialized() {
            service.initialize(&self.tickers, self.previous_days, self.session)?;
        }

        let mut engine = BacktestEngine::new(
            service,
            self.tickers,
            self.previous_days,
            interval,
            self.session,
            self.run_on_market_closed,
            self.should_print,
            self.auto_liquidate_on_finish,
        );
        for (algorithm, initial_capital) in self.algorithms {
            engine.add_algorithm(algorithm, initial_capital);
        }
        engine.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::providers::SyntheticProvider;
    use crate::strategy::BuyAndHold;

    fn provider() -> Arc<dyn MarketDataProvider> {
        Arc::new(SyntheticProvider::new(7))
    }

    #[test]
    fn missing_tickers_is_a_config_error() {
        let result = BacktestBuilder::new()
            .with_provider(provider())
            .with_interval(Duration::minutes(1))
            .with_algorithm(BuyAndHold::new("bh", ["TSLA"]), 10_000.0)
            .run();
        assert!(matches!(result, Err(BacktestError::Config(_))));
    }

    #[test]
    fn missing_provider_is_a_config_error() {
        let result = BacktestBuilder::new()
            .with_stocks(["TSLA"])
            .with_interval(Duration::minutes(1))
            .with_algorithm(BuyAndHold::new("bh", ["TSLA"]), 10_000.0)
            .run();
        assert!(matches!(result, Err(BacktestError::Config(_))));
    }

    #[test]
    fn missing_algorithm_is_a_config_error() {
        let result = BacktestBuilder::new()
            .with_stocks(["TSLA"])
            .with_provider(provider())
            .with_interval(Duration::minutes(1))
            .run();
        assert!(matches!(result, Err(BacktestError::Config(_))));
    }

    #[test]
    fn non_positive_lookback_is_a_config_error() {
        let result = BacktestBuilder::new()
            .with_stocks(["TSLA"])
            .with_provider(provider())
            .with_interval(Duration::minutes(1))
            .with_previous_days(0)
            .with_algorithm(BuyAndHold::new("bh", ["TSLA"]), 10_000.0)
            .run();
        assert!(matches!(result, Err(BacktestError::Config(_))));
    }

    #[test]
    fn sub_minute_interval_is_a_config_error() {
        let result = BacktestBuilder::new()
            .with_stocks(["TSLA"])
            .with_provider(provider())
            .with_interval(Duration::seconds(30))
            .with_algorithm(BuyAndHold::new("bh", ["TSLA"]), 10_000.0)
            .run();
        assert!(matches!(result, Err(BacktestError::Config(_))));
    }
}
