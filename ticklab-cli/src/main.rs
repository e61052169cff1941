//! TickLab CLI — runs a buy-and-hold backtest over synthetic minute data
//! and prints the report.

use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;

use ticklab_core::data::providers::SyntheticProvider;
use ticklab_core::engine::BacktestBuilder;
use ticklab_core::session::MarketSession;
use ticklab_core::strategy::BuyAndHold;

fn main() -> Result<()> {
    let tickers = ["TSLA", "AAPL"];

    let results = BacktestBuilder::new()
        .with_stocks(tickers)
        .with_previous_days(10)
        .with_interval(Duration::minutes(5))
        .with_market(MarketSession::Nyse)
        .with_auto_liquidate_on_finish(true)
        .with_provider(Arc::new(SyntheticProvider::new(7)))
        .with_algorithm(BuyAndHold::new("buy-and-hold", tickers), 1_000_000.0)
        .run()?;

    println!("{results}");
    Ok(())
}
