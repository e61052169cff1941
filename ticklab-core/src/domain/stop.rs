//! Stop orders.
//!
//! Stored as data for strategies to consult; the replay engine does not
//! trigger them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopKind {
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopOrder {
    pub symbol: String,
    pub trigger_price: f64,
    pub quantity: u32,
    pub kind: StopKind,
}

impl StopOrder {
    pub fn new(symbol: impl Into<String>, trigger_price: f64, quantity: u32, kind: StopKind) -> Self {
        Self { symbol: symbol.into(), trigger_price, quantity, kind }
    }
}
