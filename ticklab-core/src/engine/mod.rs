//! Replay engine — timeline construction, session-filtered replay, trade
//! detection, and per-strategy statistics.

pub mod backtest;
pub mod builder;
pub mod detector;
pub mod statistics;
pub mod timeline;

use crate::data::service::ServiceError;
use thiserror::Error;

pub use backtest::{BacktestEngine, BacktestResults, RISK_FREE_RATE};
pub use builder::BacktestBuilder;
pub use detector::{detect_trades, PortfolioSnapshot};
pub use statistics::{AlgorithmStatistics, TickerStats, WeeklyPerformance};
pub use timeline::Timeline;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no market data points available for backtesting")]
    EmptyTimeline,

    #[error(transparent)]
    Service(#[from] ServiceError),
}
