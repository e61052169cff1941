//! Portfolio accounting: cash, margin, long/short positions, options, stops.
//!
//! Every mutation is tied to a cash or margin movement and is atomic: a
//! failed operation returns a typed error and leaves the ledger untouched.
//! A portfolio is owned by exactly one strategy (single-writer).

use super::bar::Bar;
use super::option::{OptionContract, OptionKind};
use super::position::Position;
use super::short::ShortPosition;
use super::stop::{StopKind, StopOrder};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::collections::hash_map::Entry;
use thiserror::Error;

/// Fraction of short notional consumed from margin on open and released on
/// cover (released against the entry price, not the cover price).
pub const MARGIN_REQUIREMENT: f64 = 0.5;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("insufficient funds: need ${needed:.2}, have ${available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("insufficient shares of {symbol}: need {needed}, have {available}")]
    InsufficientShares { symbol: String, needed: u32, available: u32 },

    #[error("insufficient margin: need ${needed:.2}, have ${available:.2}")]
    InsufficientMargin { needed: f64, available: f64 },

    #[error("no short position in {0} to cover")]
    NoShortPosition(String),
}

/// Cash-and-holdings ledger for one strategy.
#[derive(Debug, Clone)]
pub struct Portfolio {
    cash: f64,
    margin_available: f64,
    total_positions: u64,
    positions: HashMap<String, Position>,
    shorts: HashMap<String, ShortPosition>,
    options: HashMap<String, Vec<OptionContract>>,
    stop_orders: HashMap<String, Vec<StopOrder>>,
    /// Realized P&L per symbol; survives positions being closed out.
    realized: HashMap<String, f64>,
    /// Last close seen per symbol, used when a valuation tick is missing a bar.
    cached_closes: HashMap<String, f64>,
}

impl Portfolio {
    /// Create a portfolio with `initial_cash` and 2x that in short margin.
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            margin_available: initial_cash * 2.0,
            total_positions: 0,
            positions: HashMap::new(),
            shorts: HashMap::new(),
            options: HashMap::new(),
            stop_orders: HashMap::new(),
            realized: HashMap::new(),
            cached_closes: HashMap::new(),
        }
    }

    /// Buy shares, debiting cash by `quantity * price`.
    pub fn buy_stock(&mut self, symbol: &str, quantity: u32, price: f64) -> Result<(), PortfolioError> {
        let cost = quantity as f64 * price;
        if cost > self.cash {
            return Err(PortfolioError::InsufficientFunds { needed: cost, available: self.cash });
        }

        match self.positions.entry(symbol.to_string()) {
            Entry::Occupied(mut entry) => entry.get_mut().add_shares(quantity, price),
            Entry::Vacant(entry) => {
                entry.insert(Position::open(quantity, price));
            }
        }
        self.cash -= cost;
        self.total_positions += 1;
        Ok(())
    }

    /// Sell shares at `price`, crediting cash and realizing P&L against the
    /// average cost. The position entry is removed once flat.
    pub fn sell_stock(&mut self, symbol: &str, quantity: u32, price: f64) -> Result<(), PortfolioError> {
        let position = self.positions.get_mut(symbol).ok_or_else(|| {
            PortfolioError::InsufficientShares { symbol: symbol.to_string(), needed: quantity, available: 0 }
        })?;
        if position.quantity() < quantity {
            return Err(PortfolioError::InsufficientShares {
                symbol: symbol.to_string(),
                needed: quantity,
                available: position.quantity(),
            });
        }

        let pnl = (price - position.average_cost()) * quantity as f64;
        position.realize(price, quantity);
        position.remove_shares(quantity);
        let now_flat = position.quantity() == 0;
        if now_flat {
            self.positions.remove(symbol);
        }

        self.cash += quantity as f64 * price;
        *self.realized.entry(symbol.to_string()).or_default() += pnl;
        self.total_positions += 1;
        Ok(())
    }

    /// Sell shares short: credits cash with the proceeds and consumes margin
    /// at `MARGIN_REQUIREMENT` of notional.
    pub fn short_stock(&mut self, symbol: &str, quantity: u32, price: f64) -> Result<(), PortfolioError> {
        let margin_required = quantity as f64 * price * MARGIN_REQUIREMENT;
        if margin_required > self.margin_available {
            return Err(PortfolioError::InsufficientMargin {
                needed: margin_required,
                available: self.margin_available,
            });
        }

        match self.shorts.entry(symbol.to_string()) {
            Entry::Occupied(mut entry) => entry.get_mut().add_shares(quantity, price),
            Entry::Vacant(entry) => {
                entry.insert(ShortPosition::open(quantity, price));
            }
        }
        self.margin_available -= margin_required;
        self.cash += quantity as f64 * price;
        self.total_positions += 1;
        Ok(())
    }

    /// Buy back shorted shares: debits cash by `quantity * price` and
    /// releases margin against the entry price.
    pub fn cover_short(&mut self, symbol: &str, quantity: u32, price: f64) -> Result<(), PortfolioError> {
        let Some(short) = self.shorts.get_mut(symbol) else {
            return Err(PortfolioError::NoShortPosition(symbol.to_string()));
        };
        if short.quantity() < quantity {
            return Err(PortfolioError::InsufficientShares {
                symbol: symbol.to_string(),
                needed: quantity,
                available: short.quantity(),
            });
        }
        let cost = quantity as f64 * price;
        if cost > self.cash {
            return Err(PortfolioError::InsufficientFunds { needed: cost, available: self.cash });
        }

        let entry_price = short.entry_price();
        let pnl = (entry_price - price) * quantity as f64;
        short.realize(price, quantity);
        short.remove_shares(quantity);
        let now_flat = short.quantity() == 0;
        if now_flat {
            self.shorts.remove(symbol);
        }

        self.cash -= cost;
        self.margin_available += quantity as f64 * entry_price * MARGIN_REQUIREMENT;
        *self.realized.entry(symbol.to_string()).or_default() += pnl;
        self.total_positions += 1;
        Ok(())
    }

    /// Buy option contracts, debiting cash by `contracts * premium * 100`.
    #[allow(clippy::too_many_arguments)]
    pub fn buy_option(
        &mut self,
        symbol: &str,
        kind: OptionKind,
        strike: f64,
        expiration: DateTime<Utc>,
        contracts: u32,
        premium: f64,
    ) -> Result<(), PortfolioError> {
        let option = OptionContract::new(symbol, kind, strike, expiration, contracts, premium);
        let cost = option.cost();
        if cost > self.cash {
            return Err(PortfolioError::InsufficientFunds { needed: cost, available: self.cash });
        }

        self.options.entry(symbol.to_string()).or_default().push(option);
        self.cash -= cost;
        self.total_positions += 1;
        Ok(())
    }

    /// Record a stop-loss order. Never triggered by the engine; strategies
    /// read these back and act on them.
    pub fn set_stop_loss(&mut self, symbol: &str, stop_price: f64, quantity: u32) {
        self.stop_orders
            .entry(symbol.to_string())
            .or_default()
            .push(StopOrder::new(symbol, stop_price, quantity, StopKind::StopLoss));
        self.total_positions += 1;
    }

    /// Record a take-profit order. Same contract as `set_stop_loss`.
    pub fn set_take_profit(&mut self, symbol: &str, target_price: f64, quantity: u32) {
        self.stop_orders
            .entry(symbol.to_string())
            .or_default()
            .push(StopOrder::new(symbol, target_price, quantity, StopKind::TakeProfit));
        self.total_positions += 1;
    }

    /// Total portfolio value at the supplied closes:
    /// `cash + long value - short value + option value`.
    ///
    /// Symbols absent from `prices` fall back to the last close this method
    /// has seen for them, and failing that to the holding's own entry price.
    pub fn total_value(&mut self, prices: &BTreeMap<String, Bar>, at: DateTime<Utc>) -> f64 {
        for (symbol, bar) in prices {
            if self.positions.contains_key(symbol)
                || self.shorts.contains_key(symbol)
                || self.options.contains_key(symbol)
            {
                self.cached_closes.insert(symbol.clone(), bar.close);
            }
        }

        let long_value: f64 = self
            .positions
            .iter()
            .map(|(symbol, position)| {
                let close = resolve_close(prices, &self.cached_closes, symbol)
                    .unwrap_or_else(|| position.average_cost());
                position.market_value(close)
            })
            .sum();

        let short_value: f64 = self
            .shorts
            .iter()
            .map(|(symbol, short)| {
                let close = resolve_close(prices, &self.cached_closes, symbol)
                    .unwrap_or_else(|| short.entry_price());
                short.quantity() as f64 * close
            })
            .sum();

        let option_value: f64 = self
            .options
            .iter()
            .flat_map(|(symbol, contracts)| {
                let close = resolve_close(prices, &self.cached_closes, symbol);
                contracts.iter().map(move |option| match close {
                    Some(spot) => option.value_at(spot, at),
                    None => 0.0,
                })
            })
            .sum();

        self.cash + long_value - short_value + option_value
    }

    /// Market value of the long position in `symbol` at the bar's close.
    pub fn position_value(&self, symbol: &str, current: &Bar) -> f64 {
        self.positions
            .get(symbol)
            .map(|position| position.market_value(current.close))
            .unwrap_or(0.0)
    }

    /// Unrealized P&L of the long position in `symbol` at the bar's close.
    pub fn unrealized_pnl(&self, symbol: &str, current: &Bar) -> f64 {
        self.positions
            .get(symbol)
            .map(|position| position.unrealized_pnl(current.close))
            .unwrap_or(0.0)
    }

    /// Cumulative realized P&L for `symbol` across closed long and short legs.
    pub fn realized_pnl(&self, symbol: &str) -> f64 {
        self.realized.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn margin_available(&self) -> f64 {
        self.margin_available
    }

    /// Monotonic count of portfolio operations, including stop and option
    /// placement. Trade counting is the statistics engine's job.
    pub fn total_positions(&self) -> u64 {
        self.total_positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn short_position(&self, symbol: &str) -> Option<&ShortPosition> {
        self.shorts.get(symbol)
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn short_positions(&self) -> &HashMap<String, ShortPosition> {
        &self.shorts
    }

    pub fn options(&self, symbol: &str) -> &[OptionContract] {
        self.options.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stop_orders(&self, symbol: &str) -> &[StopOrder] {
        self.stop_orders.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn resolve_close(
    prices: &BTreeMap<String, Bar>,
    cached: &HashMap<String, f64>,
    symbol: &str,
) -> Option<f64> {
    prices
        .get(symbol)
        .map(|bar| bar.close)
        .or_else(|| cached.get(symbol).copied())
}
