//! The replay loop.
//!
//! Replays a merged timeline chronologically: session filtering, interval
//! decimation, strategy invocation, trade detection, statistics, and
//! optional auto-liquidation on the final processed tick. Replay is serial
//! and consults no wall clock, so identical cached data always reproduces
//! identical results.

use super::detector::{detect_trades, PortfolioSnapshot};
use super::statistics::AlgorithmStatistics;
use super::timeline::Timeline;
use super::BacktestError;
use crate::data::service::HistoricalMarketService;
use crate::domain::{Bar, Portfolio, TradeKind, TradeRecord};
use crate::session::MarketSession;
use crate::strategy::Algorithm;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::Write;

/// Annual risk-free rate used for Sharpe computation.
pub const RISK_FREE_RATE: f64 = 0.02;

/// Replay engine for one backtest run.
pub struct BacktestEngine {
    service: HistoricalMarketService,
    tickers: BTreeSet<String>,
    previous_days: i64,
    interval: Duration,
    session: MarketSession,
    run_on_market_closed: bool,
    auto_liquidate_on_finish: bool,
    should_print: bool,
    algorithms: Vec<Box<dyn Algorithm>>,
    portfolios: HashMap<String, Portfolio>,
    statistics: HashMap<String, AlgorithmStatistics>,
}

impl BacktestEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: HistoricalMarketService,
        tickers: BTreeSet<String>,
        previous_days: i64,
        interval: Duration,
        session: MarketSession,
        run_on_market_closed: bool,
        should_print: bool,
        auto_liquidate_on_finish: bool,
    ) -> Self {
        Self {
            service,
            tickers,
            previous_days,
            interval,
            session,
            run_on_market_closed,
            auto_liquidate_on_finish,
            should_print,
            algorithms: Vec::new(),
            portfolios: HashMap::new(),
            statistics: HashMap::new(),
        }
    }

    /// Register a strategy with its initial capital. Strategies are invoked
    /// in registration order on every processed tick.
    pub fn add_algorithm(&mut self, algorithm: Box<dyn Algorithm>, initial_capital: f64) {
        let start_time = Utc::now() - Duration::days(self.previous_days);
        let id = algorithm.id().to_string();
        self.portfolios.insert(id.clone(), Portfolio::new(initial_capital));
        self.statistics
            .insert(id.clone(), AlgorithmStatistics::new(id, initial_capital, start_time));
        self.algorithms.push(algorithm);
    }

    /// Run the full replay and consume the engine.
    pub fn run(mut self) -> Result<BacktestResults, BacktestError> {
        let end = Utc::now();
        let start = end - Duration::days(self.previous_days);

        if self.should_print {
            println!("Running {} algorithms", self.algorithms.len());
            println!(
                "Backtest window: {} to {}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            );
        }

        let historical = self.service.fetch_historical(&self.tickers, start, end)?;
        self.replay(&historical)
    }

    fn replay(
        &mut self,
        historical: &HashMap<String, Vec<Bar>>,
    ) -> Result<BacktestResults, BacktestError> {
        let timeline = Timeline::build(historical)?;
        let (first_ts, initial_data) = timeline.first().ok_or(BacktestError::EmptyTimeline)?;
        let (last_ts, final_data) = timeline.last().ok_or(BacktestError::EmptyTimeline)?;

        if self.should_print {
            println!("Timeline created with {} points", timeline.len());
            println!("First point: {first_ts}");
            println!("Last point: {last_ts}");
        }

        for algorithm in &mut self.algorithms {
            algorithm.on_market_open(initial_data);
        }

        let session = self.session;
        let include_after_hours = self.run_on_market_closed;
        let market_points: Vec<DateTime<Utc>> = timeline
            .timestamps()
            .filter(|ts| session.is_open_at(*ts, include_after_hours))
            .collect();
        let total = market_points.len();

        if self.should_print {
            println!("Found {total} points during market hours");
        }

        let mut last_processed: Option<DateTime<Utc>> = None;
        let mut processed = 0usize;

        for timestamp in market_points {
            let due = match last_processed {
                None => true,
                Some(last) => timestamp - last >= self.interval,
            };
            if !due {
                continue;
            }
            let Some(current) = timeline.get(timestamp) else {
                continue;
            };

            self.process_tick(current, timestamp);
            last_processed = Some(timestamp);
            processed += 1;

            if self.should_print {
                print_progress(processed, total, timestamp, self.session);
            }
        }

        // Close out every book at the final processed tick's closes.
        if self.auto_liquidate_on_finish {
            if let Some(timestamp) = last_processed {
                if let Some(current) = timeline.get(timestamp) {
                    self.liquidate_all(current, timestamp);
                }
            }
        }

        for algorithm in &mut self.algorithms {
            algorithm.on_market_close(final_data);
        }
        for statistics in self.statistics.values_mut() {
            statistics.mark_period_end(last_ts);
        }

        if self.should_print {
            println!();
            println!("Backtest completed!");
            println!("Processed {processed} points out of {total} market hours points");
        }

        Ok(BacktestResults {
            statistics: std::mem::take(&mut self.statistics),
            start_time: first_ts,
            end_time: last_ts,
            portfolios: std::mem::take(&mut self.portfolios),
        })
    }

    /// One processed tick: snapshot, strategy update, trade detection,
    /// statistics roll-forward. Strategy order is stable across runs.
    fn process_tick(&mut self, current: &BTreeMap<String, Bar>, timestamp: DateTime<Utc>) {
        for algorithm in &mut self.algorithms {
            let id = algorithm.id().to_string();
            let Some(portfolio) = self.portfolios.get_mut(&id) else {
                continue;
            };
            let Some(statistics) = self.statistics.get_mut(&id) else {
                continue;
            };

            let before = PortfolioSnapshot::capture(portfolio);
            let value_before = portfolio.total_value(current, timestamp);

            algorithm.on_update(current, timestamp, portfolio);

            for trade in detect_trades(&before, portfolio, current, value_before, timestamp) {
                statistics.record_trade(trade);
            }

            let value = portfolio.total_value(current, timestamp);
            statistics.update_statistics(value, RISK_FREE_RATE);
        }
    }

    /// Close every long and short at the current tick's close, recording
    /// each trade against the liquidation block's starting value.
    fn liquidate_all(&mut self, current: &BTreeMap<String, Bar>, timestamp: DateTime<Utc>) {
        let should_print = self.should_print;
        for algorithm in &self.algorithms {
            let id = algorithm.id();
            let Some(portfolio) = self.portfolios.get_mut(id) else {
                continue;
            };
            let Some(statistics) = self.statistics.get_mut(id) else {
                continue;
            };

            if should_print {
                println!();
                println!("Automatically selling all positions for algorithm: {id}");
            }

            let value_before = portfolio.total_value(current, timestamp);

            let mut longs: Vec<(String, u32)> = portfolio
                .positions()
                .iter()
                .map(|(symbol, position)| (symbol.clone(), position.quantity()))
                .collect();
            longs.sort();
            for (symbol, quantity) in longs {
                let Some(bar) = current.get(&symbol) else {
                    continue;
                };
                if quantity == 0 {
                    continue;
                }
                statistics.record_trade(TradeRecord {
                    symbol: symbol.clone(),
                    kind: TradeKind::Sell,
                    quantity,
                    price: bar.close,
                    portfolio_value_before: value_before,
                    timestamp,
                });
                if let Err(e) = portfolio.sell_stock(&symbol, quantity, bar.close) {
                    eprintln!("Failed to sell position for {symbol}: {e}");
                }
            }

            let mut shorts: Vec<(String, u32)> = portfolio
                .short_positions()
                .iter()
                .map(|(symbol, short)| (symbol.clone(), short.quantity()))
                .collect();
            shorts.sort();
            for (symbol, quantity) in shorts {
                let Some(bar) = current.get(&symbol) else {
                    continue;
                };
                if quantity == 0 {
                    continue;
                }
                statistics.record_trade(TradeRecord {
                    symbol: symbol.clone(),
                    kind: TradeKind::Cover,
                    quantity,
                    price: bar.close,
                    portfolio_value_before: value_before,
                    timestamp,
                });
                if let Err(e) = portfolio.cover_short(&symbol, quantity, bar.close) {
                    eprintln!("Failed to cover short position for {symbol}: {e}");
                }
            }

            let final_value = portfolio.total_value(current, timestamp);
            statistics.update_statistics(final_value, RISK_FREE_RATE);
        }
    }
}

/// Everything a backtest produces: per-strategy statistics and final
/// portfolios, plus the replayed window.
pub struct BacktestResults {
    pub statistics: HashMap<String, AlgorithmStatistics>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub portfolios: HashMap<String, Portfolio>,
}

impl fmt::Display for BacktestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backtest Results")?;
        writeln!(f, "================")?;
        writeln!(f, "Period: {} to {}", self.start_time, self.end_time)?;
        writeln!(f, "----------------")?;

        let mut ids: Vec<&String> = self.statistics.keys().collect();
        ids.sort();
        for id in ids {
            write!(f, "{}", self.statistics[id])?;
            writeln!(f, "----------------")?;
        }
        Ok(())
    }
}

fn print_progress(current: usize, total: usize, timestamp: DateTime<Utc>, session: MarketSession) {
    const BAR_WIDTH: usize = 50;
    let progress = current as f64 / (total + 1) as f64;
    let filled = (progress * BAR_WIDTH as f64) as usize;

    let market_time = timestamp.with_timezone(&session.zone());
    print!(
        "\r[{}>{}] {:.1}% | Market Time: {}",
        "=".repeat(filled),
        " ".repeat(BAR_WIDTH.saturating_sub(filled)),
        progress * 100.0,
        market_time.format("%Y-%m-%d %H:%M:%S %Z"),
    );
    let _ = std::io::stdout().flush();
}
