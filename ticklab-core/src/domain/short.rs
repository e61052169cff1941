//! Short position with entry-price accounting.

use chrono::{DateTime, Utc};

/// An open short holding: shares owed plus the entry price they were sold at.
///
/// The entry price is volume-weighted across add operations so that margin
/// released on cover always equals margin consumed on open.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortPosition {
    quantity: u32,
    entry_price: f64,
    realized_pnl: f64,
    last_update: DateTime<Utc>,
}

impl ShortPosition {
    pub fn open(quantity: u32, entry_price: f64) -> Self {
        Self { quantity, entry_price, realized_pnl: 0.0, last_update: Utc::now() }
    }

    /// Add shares sold short at `price`, re-weighting the entry price.
    pub fn add_shares(&mut self, quantity: u32, price: f64) {
        let total = self.quantity + quantity;
        if total > 0 {
            self.entry_price = (self.entry_price * self.quantity as f64
                + price * quantity as f64)
                / total as f64;
        }
        self.quantity = total;
        self.last_update = Utc::now();
    }

    /// Remove covered shares. The caller has already verified the quantity.
    pub fn remove_shares(&mut self, quantity: u32) {
        debug_assert!(quantity <= self.quantity, "portfolio checks quantity before removal");
        self.quantity -= quantity;
        self.last_update = Utc::now();
    }

    /// Record realized P&L for a cover at `cover_price`. Call before
    /// `remove_shares`.
    pub fn realize(&mut self, cover_price: f64, quantity: u32) {
        self.realized_pnl += (self.entry_price - cover_price) * quantity as f64;
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Mark-to-price value: positive when the price has fallen below entry.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity as f64 * (self.entry_price - price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_price_is_volume_weighted() {
        let mut short = ShortPosition::open(100, 50.0);
        short.add_shares(300, 70.0);
        assert_eq!(short.quantity(), 400);
        assert!((short.entry_price() - 65.0).abs() < 1e-10);
    }

    #[test]
    fn realize_uses_entry_price() {
        let mut short = ShortPosition::open(100, 50.0);
        short.realize(40.0, 100);
        short.remove_shares(100);
        assert!((short.realized_pnl() - 1000.0).abs() < 1e-10);
        assert_eq!(short.quantity(), 0);
    }

    #[test]
    fn unrealized_pnl_gains_when_price_falls() {
        let short = ShortPosition::open(100, 50.0);
        assert!((short.unrealized_pnl(45.0) - 500.0).abs() < 1e-10);
        assert!((short.unrealized_pnl(55.0) + 500.0).abs() < 1e-10);
    }
}
