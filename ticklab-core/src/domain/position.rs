//! Long position with cost-basis accounting.

use chrono::{DateTime, Utc};

/// An open long holding in a single symbol.
///
/// Owned by exactly one portfolio under single-writer discipline; quantity
/// and cost-basis checks belong to the portfolio, which validates before
/// mutating.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    quantity: u32,
    cost_basis: f64,
    realized_pnl: f64,
    last_update: DateTime<Utc>,
}

impl Position {
    pub fn open(quantity: u32, price: f64) -> Self {
        Self {
            quantity,
            cost_basis: quantity as f64 * price,
            realized_pnl: 0.0,
            last_update: Utc::now(),
        }
    }

    /// Add shares at `price`, growing the aggregate cost basis.
    pub fn add_shares(&mut self, quantity: u32, price: f64) {
        self.quantity += quantity;
        self.cost_basis += quantity as f64 * price;
        self.last_update = Utc::now();
    }

    /// Remove shares at average cost. The caller has already verified the
    /// quantity is available. The basis resets to zero when the position
    /// goes flat.
    pub fn remove_shares(&mut self, quantity: u32) {
        debug_assert!(quantity <= self.quantity, "portfolio checks quantity before removal");
        let average_cost = self.average_cost();
        self.quantity -= quantity;
        self.cost_basis -= quantity as f64 * average_cost;
        if self.quantity == 0 {
            self.cost_basis = 0.0;
        }
        self.last_update = Utc::now();
    }

    /// Record realized P&L for a sale at `sale_price` against the current
    /// average cost. Call before `remove_shares`.
    pub fn realize(&mut self, sale_price: f64, quantity: u32) {
        self.realized_pnl += (sale_price - self.average_cost()) * quantity as f64;
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn cost_basis(&self) -> f64 {
        self.cost_basis
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Average cost per share; zero when flat.
    pub fn average_cost(&self) -> f64 {
        if self.quantity == 0 {
            0.0
        } else {
            self.cost_basis / self.quantity as f64
        }
    }

    /// Market value at the given price.
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity as f64 * price
    }

    /// Mark-to-price value minus cost basis.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity as f64 * (price - self.average_cost())
    }
}
