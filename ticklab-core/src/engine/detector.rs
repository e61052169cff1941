//! Trade detection — diff portfolio snapshots to infer what a strategy did.
//!
//! The engine snapshots holdings before a strategy's update and diffs them
//! against the portfolio afterwards. The resulting events are the only way
//! trades reach the statistics engine; strategies never report trades
//! directly. Applying the emitted events in order to the pre-snapshot
//! reconstructs the post-snapshot.

use crate::domain::{Bar, Portfolio, TradeKind, TradeRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Deep copy of holding quantities and prices at one instant.
#[derive(Debug, Clone, Default)]
pub struct PortfolioSnapshot {
    /// symbol -> (quantity, average cost)
    pub longs: HashMap<String, (u32, f64)>,
    /// symbol -> (quantity, entry price)
    pub shorts: HashMap<String, (u32, f64)>,
}

impl PortfolioSnapshot {
    pub fn capture(portfolio: &Portfolio) -> Self {
        let longs = portfolio
            .positions()
            .iter()
            .map(|(symbol, position)| {
                (symbol.clone(), (position.quantity(), position.average_cost()))
            })
            .collect();
        let shorts = portfolio
            .short_positions()
            .iter()
            .map(|(symbol, short)| (symbol.clone(), (short.quantity(), short.entry_price())))
            .collect();
        Self { longs, shorts }
    }
}

/// Diff `before` against the portfolio's current holdings and emit trade
/// events in deterministic (symbol-sorted, longs-then-shorts) order.
///
/// Opens and adds are priced at the position's average cost / entry price;
/// reductions and closes at the current close, falling back to the
/// snapshot price when the tick has no bar for the symbol.
pub fn detect_trades(
    before: &PortfolioSnapshot,
    portfolio: &Portfolio,
    current: &BTreeMap<String, Bar>,
    portfolio_value_before: f64,
    timestamp: DateTime<Utc>,
) -> Vec<TradeRecord> {
    let mut events = Vec::new();
    let close_of = |symbol: &str, fallback: f64| {
        current.get(symbol).map(|bar| bar.close).unwrap_or(fallback)
    };
    let record = |events: &mut Vec<TradeRecord>, symbol: &str, kind, quantity, price| {
        events.push(TradeRecord {
            symbol: symbol.to_string(),
            kind,
            quantity,
            price,
            portfolio_value_before,
            timestamp,
        });
    };

    let long_symbols: BTreeSet<&String> = before
        .longs
        .keys()
        .chain(portfolio.positions().keys())
        .collect();
    for symbol in long_symbols {
        let prev = before.longs.get(symbol.as_str()).copied();
        let now = portfolio
            .position(symbol)
            .map(|p| (p.quantity(), p.average_cost()));
        match (prev, now) {
            // New long position
            (None, Some((quantity, avg_cost))) => {
                record(&mut events, symbol, TradeKind::Buy, quantity, avg_cost);
            }
            (Some((prev_qty, prev_avg)), Some((qty, avg_cost))) => {
                if qty > prev_qty {
                    record(&mut events, symbol, TradeKind::Buy, qty - prev_qty, avg_cost);
                } else if qty < prev_qty {
                    let price = close_of(symbol, prev_avg);
                    record(&mut events, symbol, TradeKind::Sell, prev_qty - qty, price);
                }
            }
            // Position was closed
            (Some((prev_qty, prev_avg)), None) => {
                let price = close_of(symbol, prev_avg);
                record(&mut events, symbol, TradeKind::Sell, prev_qty, price);
            }
            (None, None) => {}
        }
    }

    let short_symbols: BTreeSet<&String> = before
        .shorts
        .keys()
        .chain(portfolio.short_positions().keys())
        .collect();
    for symbol in short_symbols {
        let prev = before.shorts.get(symbol.as_str()).copied();
        let now = portfolio
            .short_position(symbol)
            .map(|s| (s.quantity(), s.entry_price()));
        match (prev, now) {
            (None, Some((quantity, entry))) => {
                record(&mut events, symbol, TradeKind::Short, quantity, entry);
            }
            (Some((prev_qty, prev_entry)), Some((qty, entry))) => {
                if qty > prev_qty {
                    record(&mut events, symbol, TradeKind::Short, qty - prev_qty, entry);
                } else if qty < prev_qty {
                    let price = close_of(symbol, prev_entry);
                    record(&mut events, symbol, TradeKind::Cover, prev_qty - qty, price);
                }
            }
            (Some((prev_qty, prev_entry)), None) => {
                let price = close_of(symbol, prev_entry);
                record(&mut events, symbol, TradeKind::Cover, prev_qty, price);
            }
            (None, None) => {}
        }
    }

    events
}
