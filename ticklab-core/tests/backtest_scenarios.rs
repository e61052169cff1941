//! End-to-end replay scenarios through the builder.
//!
//! Each scenario feeds a fixture provider with hand-written minute bars and
//! drives a scripted strategy, then checks cash, margin, realized P&L, and
//! which ticks were actually processed.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use ticklab_core::data::provider::{
    MarketDataError, MarketDataProvider, ProviderCapabilities, QuoteSnapshot,
};
use ticklab_core::domain::{Bar, BarSeries, Portfolio};
use ticklab_core::engine::BacktestBuilder;
use ticklab_core::session::MarketSession;
use ticklab_core::strategy::Algorithm;

/// Lookback long enough that fixed 2024 timestamps fall inside the window.
const LOOKBACK_DAYS: i64 = 2_000;

/// Provider serving pre-built bars per symbol.
struct FixtureProvider {
    bars: HashMap<String, Vec<Bar>>,
}

impl FixtureProvider {
    fn new(bars: HashMap<String, Vec<Bar>>) -> Arc<Self> {
        Arc::new(Self { bars })
    }
}

impl MarketDataProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
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
        let symbol = symbols.iter().next().unwrap();
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.clone()))?;

        let mut series = BarSeries::new(symbol.clone());
        for bar in bars {
            if bar.timestamp >= start && bar.timestamp <= end {
                series.insert(bar.clone()).unwrap();
            }
        }
        Ok(series)
    }

    fn fetch_latest(&self, _symbols: &BTreeSet<String>) -> Result<QuoteSnapshot, MarketDataError> {
        Ok(QuoteSnapshot { quotes: BTreeMap::new(), timestamp: Utc::now() })
    }

    fn is_available(&self) -> bool {
        true
    }

    fn rate_limit(&self) -> u32 {
        u32::MAX
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { supports_historical: true, granularity: Duration::minutes(1) }
    }
}

/// Bar at an exact UTC instant; 2024-01-08 is a Monday, EST (UTC-5).
fn bar_at(symbol: &str, hour: u32, minute: u32, close: f64) -> Bar {
    let ts = Utc.with_ymd_and_hms(2024, 1, 8, hour, minute, 0).unwrap();
    Bar::new(symbol, ts, close, close + 1.0, close - 1.0, close, 10_000.0)
}

/// Buys a fixed quantity of one symbol on the first tick it sees.
struct BuyOnce {
    id: String,
    symbol: String,
    quantity: u32,
    done: bool,
}

impl Algorithm for BuyOnce {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_update(
        &mut self,
        current_data: &BTreeMap<String, Bar>,
        _timestamp: DateTime<Utc>,
        portfolio: &mut Portfolio,
    ) {
        if self.done {
            return;
        }
        if let Some(bar) = current_data.get(&self.symbol) {
            portfolio.buy_stock(&self.symbol, self.quantity, bar.close).unwrap();
            self.done = true;
        }
    }
}

/// Shorts on the first tick, covers on the second.
struct ShortThenCover {
    id: String,
    symbol: String,
    quantity: u32,
    ticks_seen: usize,
}

impl Algorithm for ShortThenCover {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_update(
        &mut self,
        current_data: &BTreeMap<String, Bar>,
        _timestamp: DateTime<Utc>,
        portfolio: &mut Portfolio,
    ) {
        let Some(bar) = current_data.get(&self.symbol) else {
            return;
        };
        match self.ticks_seen {
            0 => portfolio.short_stock(&self.symbol, self.quantity, bar.close).unwrap(),
            1 => portfolio.cover_short(&self.symbol, self.quantity, bar.close).unwrap(),
            _ => {}
        }
        self.ticks_seen += 1;
    }
}

/// Records every timestamp the engine admits.
struct Recorder {
    id: String,
    seen: Arc<Mutex<Vec<DateTime<Utc>>>>,
}

impl Algorithm for Recorder {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_update(
        &mut self,
        _current_data: &BTreeMap<String, Bar>,
        timestamp: DateTime<Utc>,
        _portfolio: &mut Portfolio,
    ) {
        self.seen.lock().unwrap().push(timestamp);
    }
}

#[test]
fn buy_and_hold_with_auto_liquidation() {
    // 09:30 ET close 200, 10:00 ET close 220, 15:59 ET close 210
    let bars = HashMap::from([(
        "TSLA".to_string(),
        vec![
            bar_at("TSLA", 14, 30, 200.0),
            bar_at("TSLA", 15, 0, 220.0),
            bar_at("TSLA", 20, 59, 210.0),
        ],
    )]);

    let results = BacktestBuilder::new()
        .with_stocks(["TSLA"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(1))
        .with_should_print(false)
        .with_auto_liquidate_on_finish(true)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(
            BuyOnce { id: "bh".into(), symbol: "TSLA".into(), quantity: 50, done: false },
            1_000_000.0,
        )
        .run()
        .unwrap();

    let portfolio = &results.portfolios["bh"];
    assert_eq!(portfolio.cash(), 1_000_000.0 - 50.0 * 200.0 + 50.0 * 210.0);
    assert!(portfolio.position("TSLA").is_none(), "liquidation closes every long");
    assert!((portfolio.realized_pnl("TSLA") - 500.0).abs() < 1e-9);

    let stats = &results.statistics["bh"];
    assert!(stats.total_trades() >= 2);
    let ticker = stats.ticker_stats("TSLA").unwrap();
    assert!((ticker.total_pnl - 500.0).abs() < 1e-9);
    assert_eq!(ticker.profitable_sells, 1);
}

#[test]
fn short_round_trip() {
    // 09:30 ET close 50, 09:31 ET close 40
    let bars = HashMap::from([(
        "TSLA".to_string(),
        vec![bar_at("TSLA", 14, 30, 50.0), bar_at("TSLA", 14, 31, 40.0)],
    )]);

    let results = BacktestBuilder::new()
        .with_stocks(["TSLA"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(1))
        .with_should_print(false)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(
            ShortThenCover { id: "sc".into(), symbol: "TSLA".into(), quantity: 100, ticks_seen: 0 },
            100_000.0,
        )
        .run()
        .unwrap();

    let portfolio = &results.portfolios["sc"];
    assert_eq!(portfolio.cash(), 100_000.0 + 100.0 * 50.0 - 100.0 * 40.0);
    assert_eq!(portfolio.margin_available(), 200_000.0);
    assert!((portfolio.realized_pnl("TSLA") - 1_000.0).abs() < 1e-9);

    let stats = &results.statistics["sc"];
    let ticker = stats.ticker_stats("TSLA").unwrap();
    assert!((ticker.total_pnl - 1_000.0).abs() < 1e-9);
}

#[test]
fn interval_decimation_processes_every_fifth_minute() {
    // Bars every minute 09:30-09:45 ET
    let bars = HashMap::from([(
        "TSLA".to_string(),
        (30..=45).map(|m| bar_at("TSLA", 14, m, 200.0)).collect::<Vec<_>>(),
    )]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    BacktestBuilder::new()
        .with_stocks(["TSLA"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(5))
        .with_should_print(false)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(Recorder { id: "rec".into(), seen: Arc::clone(&seen) }, 10_000.0)
        .run()
        .unwrap();

    let expected: Vec<DateTime<Utc>> = [30, 35, 40, 45]
        .iter()
        .map(|m| Utc.with_ymd_and_hms(2024, 1, 8, 14, *m, 0).unwrap())
        .collect();
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[test]
fn gaps_between_processed_ticks_respect_interval() {
    let bars = HashMap::from([(
        "TSLA".to_string(),
        (0..=30).map(|m| bar_at("TSLA", 15, m, 200.0)).collect::<Vec<_>>(),
    )]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    BacktestBuilder::new()
        .with_stocks(["TSLA"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(7))
        .with_should_print(false)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(Recorder { id: "rec".into(), seen: Arc::clone(&seen) }, 10_000.0)
        .run()
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::minutes(7));
    }
}

#[test]
fn session_filter_drops_premarket_bars() {
    // 08:00 ET (premarket) and 09:45 ET
    let bars = HashMap::from([(
        "TSLA".to_string(),
        vec![bar_at("TSLA", 13, 0, 195.0), bar_at("TSLA", 14, 45, 200.0)],
    )]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    BacktestBuilder::new()
        .with_stocks(["TSLA"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(1))
        .with_should_print(false)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(Recorder { id: "rec".into(), seen: Arc::clone(&seen) }, 10_000.0)
        .run()
        .unwrap();

    let expected = vec![Utc.with_ymd_and_hms(2024, 1, 8, 14, 45, 0).unwrap()];
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[test]
fn run_on_market_closed_admits_premarket_but_not_weekend() {
    let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 17, 0, 0).unwrap();
    let bars = HashMap::from([(
        "TSLA".to_string(),
        vec![
            Bar::new("TSLA", saturday, 195.0, 196.0, 194.0, 195.0, 10_000.0),
            bar_at("TSLA", 13, 0, 195.0), // Monday 08:00 ET
            bar_at("TSLA", 14, 45, 200.0),
        ],
    )]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    BacktestBuilder::new()
        .with_stocks(["TSLA"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(1))
        .with_should_print(false)
        .with_run_on_market_closed(true)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(Recorder { id: "rec".into(), seen: Arc::clone(&seen) }, 10_000.0)
        .run()
        .unwrap();

    let expected: Vec<DateTime<Utc>> = vec![
        Utc.with_ymd_and_hms(2024, 1, 8, 13, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 8, 14, 45, 0).unwrap(),
    ];
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[test]
fn multi_ticker_timeline_merges_and_both_strategies_run() {
    let bars = HashMap::from([
        (
            "TSLA".to_string(),
            vec![bar_at("TSLA", 14, 30, 200.0), bar_at("TSLA", 14, 31, 205.0)],
        ),
        ("AAPL".to_string(), vec![bar_at("AAPL", 14, 31, 150.0)]),
    ]);

    let results = BacktestBuilder::new()
        .with_stocks(["TSLA", "AAPL"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(1))
        .with_should_print(false)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(
            BuyOnce { id: "tsla".into(), symbol: "TSLA".into(), quantity: 10, done: false },
            100_000.0,
        )
        .with_algorithm(
            BuyOnce { id: "aapl".into(), symbol: "AAPL".into(), quantity: 10, done: false },
            100_000.0,
        )
        .run()
        .unwrap();

    assert_eq!(results.portfolios["tsla"].position("TSLA").unwrap().quantity(), 10);
    assert_eq!(results.portfolios["aapl"].position("AAPL").unwrap().quantity(), 10);
    assert_eq!(results.start_time, Utc.with_ymd_and_hms(2024, 1, 8, 14, 30, 0).unwrap());
    assert_eq!(results.end_time, Utc.with_ymd_and_hms(2024, 1, 8, 14, 31, 0).unwrap());
}

#[test]
fn auto_liquidation_flattens_shorts_even_under_decimation() {
    // Short opened on the first tick is never covered by the strategy;
    // a 5-minute interval also leaves the final minute unprocessed.
    let bars = HashMap::from([(
        "TSLA".to_string(),
        (30..=43).map(|m| bar_at("TSLA", 14, m, 50.0 - (m - 30) as f64 * 0.5)).collect::<Vec<_>>(),
    )]);

    struct ShortOnce {
        done: bool,
    }
    impl Algorithm for ShortOnce {
        fn id(&self) -> &str {
            "short-once"
        }
        fn on_update(
            &mut self,
            current_data: &BTreeMap<String, Bar>,
            _timestamp: DateTime<Utc>,
            portfolio: &mut Portfolio,
        ) {
            if !self.done {
                let bar = &current_data["TSLA"];
                portfolio.short_stock("TSLA", 100, bar.close).unwrap();
                self.done = true;
            }
        }
    }

    let results = BacktestBuilder::new()
        .with_stocks(["TSLA"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(5))
        .with_should_print(false)
        .with_auto_liquidate_on_finish(true)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(ShortOnce { done: false }, 100_000.0)
        .run()
        .unwrap();

    let portfolio = &results.portfolios["short-once"];
    assert!(portfolio.short_position("TSLA").is_none(), "liquidation covers every short");
    assert!(portfolio.positions().is_empty());
    // Short at 50.00 (09:30), covered at the last processed tick 09:40 (close 45.00).
    assert!((portfolio.realized_pnl("TSLA") - 100.0 * 5.0).abs() < 1e-9);
    assert_eq!(portfolio.margin_available(), 200_000.0);
}

#[test]
fn report_renders_for_completed_run() {
    let bars = HashMap::from([(
        "TSLA".to_string(),
        vec![
            bar_at("TSLA", 14, 30, 200.0),
            bar_at("TSLA", 15, 0, 220.0),
            bar_at("TSLA", 20, 59, 210.0),
        ],
    )]);

    let results = BacktestBuilder::new()
        .with_stocks(["TSLA"])
        .with_previous_days(LOOKBACK_DAYS)
        .with_interval(Duration::minutes(1))
        .with_should_print(false)
        .with_auto_liquidate_on_finish(true)
        .with_provider(FixtureProvider::new(bars))
        .with_algorithm(
            BuyOnce { id: "bh".into(), symbol: "TSLA".into(), quantity: 50, done: false },
            1_000_000.0,
        )
        .run()
        .unwrap();

    let report = results.to_string();
    assert!(report.contains("Backtest Results"));
    assert!(report.contains("Algorithm Statistics for bh"));
    assert!(report.contains("TSLA:"));
}
