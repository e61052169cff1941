//! Per-strategy running statistics.
//!
//! Updated on every processed tick (drawdown, Sharpe, cumulative returns)
//! and on every detected trade (per-ticker and per-week attribution). The
//! Display impl renders the human-readable block of the final report.

use crate::domain::{TradeKind, TradeRecord};
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Round-trip attribution for one ticker.
///
/// A SELL or COVER pairs against the most recent BUY/SHORT lot; only those
/// paired closes count as "sells" here.
#[derive(Debug, Clone, Default)]
pub struct TickerStats {
    pub total_sells: u32,
    pub profitable_sells: u32,
    pub total_pnl: f64,
    pub largest_gain: f64,
    pub largest_loss: f64,
    last_open_price: Option<f64>,
}

impl TickerStats {
    fn update(&mut self, trade: &TradeRecord) {
        match trade.kind {
            TradeKind::Buy | TradeKind::Short => {
                self.last_open_price = Some(trade.price);
            }
            TradeKind::Sell | TradeKind::Cover => {
                let Some(open_price) = self.last_open_price.take() else {
                    return;
                };
                let profit = match trade.kind {
                    TradeKind::Sell => (trade.price - open_price) * trade.quantity as f64,
                    _ => (open_price - trade.price) * trade.quantity as f64,
                };
                self.total_sells += 1;
                self.total_pnl += profit;
                if profit > 0.0 {
                    self.profitable_sells += 1;
                    self.largest_gain = self.largest_gain.max(profit);
                } else {
                    self.largest_loss = self.largest_loss.min(profit);
                }
            }
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_sells == 0 {
            0.0
        } else {
            self.profitable_sells as f64 / self.total_sells as f64 * 100.0
        }
    }
}

/// Completed round trips aggregated by the week they were closed in.
#[derive(Debug, Clone, Default)]
pub struct WeeklyPerformance {
    pub total_sells: u32,
    pub total_pnl: f64,
    pub profit_per_share: f64,
}

impl WeeklyPerformance {
    fn record_completed(&mut self, open: &TradeRecord, close: &TradeRecord) {
        let profit = match close.kind {
            TradeKind::Sell => (close.price - open.price) * close.quantity as f64,
            _ => (open.price - close.price) * close.quantity as f64,
        };
        self.total_sells += 1;
        self.total_pnl += profit;
        self.profit_per_share = profit / close.quantity as f64;
    }

    pub fn has_activity(&self) -> bool {
        self.total_sells > 0 || self.total_pnl != 0.0
    }
}

/// Running metrics for one strategy across a backtest.
#[derive(Debug, Clone)]
pub struct AlgorithmStatistics {
    algorithm_id: String,
    start_time: DateTime<Utc>,
    initial_value: f64,
    total_profit: f64,
    peak_value: f64,
    max_drawdown: f64,
    sharpe_ratio: f64,
    total_value: f64,
    returns: Vec<f64>,
    ticker_stats: BTreeMap<String, TickerStats>,
    weekly: BTreeMap<NaiveDate, WeeklyPerformance>,
    open_trades: HashMap<String, TradeRecord>,
    trade_history: Vec<TradeRecord>,
    total_trades: u32,
    period_end: Option<DateTime<Utc>>,
}

impl AlgorithmStatistics {
    pub fn new(algorithm_id: impl Into<String>, initial_value: f64, start_time: DateTime<Utc>) -> Self {
        Self {
            algorithm_id: algorithm_id.into(),
            start_time,
            initial_value,
            total_profit: 0.0,
            peak_value: initial_value,
            max_drawdown: 0.0,
            sharpe_ratio: 0.0,
            total_value: initial_value,
            returns: Vec::new(),
            ticker_stats: BTreeMap::new(),
            weekly: BTreeMap::new(),
            open_trades: HashMap::new(),
            trade_history: Vec::new(),
            total_trades: 0,
            period_end: None,
        }
    }

    /// Ingest one detector event.
    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.total_trades += 1;
        self.ticker_stats
            .entry(trade.symbol.clone())
            .or_default()
            .update(&trade);

        match trade.kind {
            TradeKind::Buy | TradeKind::Short => {
                self.open_trades.insert(trade.symbol.clone(), trade.clone());
            }
            TradeKind::Sell | TradeKind::Cover => {
                if let Some(open) = self.open_trades.remove(&trade.symbol) {
                    let week_start = trade.timestamp.date_naive().week(Weekday::Mon).first_day();
                    self.weekly
                        .entry(week_start)
                        .or_default()
                        .record_completed(&open, &trade);
                }
            }
        }

        self.trade_history.push(trade);
    }

    /// Roll the running metrics forward with the portfolio's current value.
    /// `risk_free_rate` is annual; the Sharpe computation scales it to the
    /// per-tick return frequency.
    pub fn update_statistics(&mut self, current_value: f64, risk_free_rate: f64) {
        self.total_profit = current_value - self.initial_value;
        self.total_value = current_value;

        if current_value > self.peak_value {
            self.peak_value = current_value;
        }
        let drawdown = (self.peak_value - current_value) / self.peak_value * 100.0;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }

        self.returns.push((current_value - self.initial_value) / self.initial_value);

        if self.returns.len() > 1 {
            let n = self.returns.len() as f64;
            let mean = self.returns.iter().sum::<f64>() / n;
            let variance =
                self.returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let std_dev = variance.sqrt();
            self.sharpe_ratio = if std_dev != 0.0 {
                252.0_f64.sqrt() * (mean - risk_free_rate / 252.0) / std_dev
            } else {
                0.0
            };
        }
    }

    /// Record the final replay timestamp so the report never consults the
    /// wall clock.
    pub fn mark_period_end(&mut self, end: DateTime<Utc>) {
        self.period_end = Some(end);
    }

    pub fn algorithm_id(&self) -> &str {
        &self.algorithm_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn initial_value(&self) -> f64 {
        self.initial_value
    }

    pub fn total_profit(&self) -> f64 {
        self.total_profit
    }

    pub fn peak_value(&self) -> f64 {
        self.peak_value
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn sharpe_ratio(&self) -> f64 {
        self.sharpe_ratio
    }

    pub fn total_value(&self) -> f64 {
        self.total_value
    }

    pub fn total_trades(&self) -> u32 {
        self.total_trades
    }

    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    pub fn ticker_stats(&self, symbol: &str) -> Option<&TickerStats> {
        self.ticker_stats.get(symbol)
    }

    pub fn all_ticker_stats(&self) -> &BTreeMap<String, TickerStats> {
        &self.ticker_stats
    }

    pub fn weekly_performance(&self) -> &BTreeMap<NaiveDate, WeeklyPerformance> {
        &self.weekly
    }

    pub fn trade_history(&self) -> &[TradeRecord] {
        &self.trade_history
    }

    fn days_run(&self) -> i64 {
        self.period_end
            .map(|end| (end - self.start_time).num_days())
            .unwrap_or(0)
    }
}

impl fmt::Display for AlgorithmStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days_run = self.days_run();
        let annualized_return = match self.returns.last() {
            Some(last) => ((1.0 + last).powi(252) - 1.0) * 100.0,
            None => 0.0,
        };
        let trades_per_day = if days_run > 0 {
            self.total_trades as f64 / days_run as f64
        } else {
            0.0
        };

        writeln!(f, "Algorithm Statistics for {}:", self.algorithm_id)?;
        writeln!(f, "Backtest Period: {days_run} days")?;
        writeln!(f, "Total Trades: {}", self.total_trades)?;
        writeln!(f, "Total Profit/Loss: ${:.2}", self.total_profit)?;
        writeln!(f, "Annualized Return: {annualized_return:.2}%")?;
        writeln!(f, "Maximum Drawdown: {:.2}%", self.max_drawdown)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)?;
        writeln!(f, "Average Trades Per Day: {trades_per_day:.2}")?;
        writeln!(f, "Total Value: ${:.2}", self.total_value)?;
        writeln!(f)?;
        writeln!(f, "Per-Ticker Performance:")?;
        writeln!(f, "=====================")?;

        for (symbol, stats) in &self.ticker_stats {
            writeln!(f, "{symbol}:")?;
            writeln!(f, "  Total Sells: {}", stats.total_sells)?;
            writeln!(
                f,
                "  Profitable Sells: {} ({:.1}%)",
                stats.profitable_sells,
                stats.win_rate()
            )?;
            writeln!(f, "  Total P/L: ${:.2}", stats.total_pnl)?;
            let avg = if stats.total_sells > 0 {
                stats.total_pnl / stats.total_sells as f64
            } else {
                0.0
            };
            writeln!(f, "  Average P/L per Sale: ${avg:.2}")?;
            writeln!(f, "  Largest Gain: ${:.2}", stats.largest_gain)?;
            writeln!(f, "  Largest Loss: ${:.2}", stats.largest_loss)?;
            writeln!(f)?;
        }

        writeln!(f, "Weekly Performance:")?;
        writeln!(f, "===================")?;
        let active_weeks: Vec<_> = self.weekly.iter().filter(|(_, p)| p.has_activity()).collect();
        if active_weeks.is_empty() {
            writeln!(f, "No completed trades yet")?;
        } else {
            for (week_start, perf) in active_weeks {
                let week_end = *week_start + chrono::Duration::days(6);
                writeln!(
                    f,
                    "Week {} - {}:",
                    week_start.format("%m/%d/%Y"),
                    week_end.format("%m/%d/%Y")
                )?;
                writeln!(f, "  P/L: ${:.2}", perf.total_pnl)?;
                writeln!(f, "  Completed Trades: {}", perf.total_sells)?;
                if perf.total_sells > 0 {
                    writeln!(f, "  Average P/L per Share: ${:.2}", perf.profit_per_share)?;
                }
                writeln!(f)?;
            }
        }

        Ok(())
    }
}
