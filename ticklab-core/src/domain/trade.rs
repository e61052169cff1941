//! Trade events emitted by the trade detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a trade did to the portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeKind {
    /// Open or add to a long position
    Buy,
    /// Close or reduce a long position
    Sell,
    /// Open or add to a short position
    Short,
    /// Close or reduce a short position
    Cover,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeKind::Buy => "BUY",
            TradeKind::Sell => "SELL",
            TradeKind::Short => "SHORT",
            TradeKind::Cover => "COVER",
        };
        f.write_str(s)
    }
}

/// One synthetic trade event, inferred from portfolio deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub kind: TradeKind,
    pub quantity: u32,
    pub price: f64,
    pub portfolio_value_before: f64,
    pub timestamp: DateTime<Utc>,
}
