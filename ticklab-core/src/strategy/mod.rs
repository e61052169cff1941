//! Strategy contract and built-in strategies.

pub mod buy_and_hold;

pub use buy_and_hold::BuyAndHold;

use crate::domain::{Bar, Portfolio};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A trading strategy driven by the replay engine.
///
/// `on_update` fires on every admitted tick with a mutable view of the
/// strategy's own portfolio; any portfolio mutation is picked up by the
/// trade detector afterwards. Strategies never report trades themselves.
pub trait Algorithm {
    /// Unique identifier within one engine run.
    fn id(&self) -> &str;

    /// Called once with the first timestamp's bars.
    fn on_market_open(&mut self, _initial_data: &BTreeMap<String, Bar>) {}

    /// Called on every admitted tick.
    fn on_update(
        &mut self,
        current_data: &BTreeMap<String, Bar>,
        timestamp: DateTime<Utc>,
        portfolio: &mut Portfolio,
    );

    /// Called once with the last timestamp's bars.
    fn on_market_close(&mut self, _final_data: &BTreeMap<String, Bar>) {}
}
