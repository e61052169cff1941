//! Equity option contracts held long in a portfolio.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

/// A purchased option. Each contract covers 100 shares.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionContract {
    pub symbol: String,
    pub kind: OptionKind,
    pub strike: f64,
    pub expiration: DateTime<Utc>,
    pub contracts: u32,
    pub premium: f64,
}

impl OptionContract {
    pub fn new(
        symbol: impl Into<String>,
        kind: OptionKind,
        strike: f64,
        expiration: DateTime<Utc>,
        contracts: u32,
        premium: f64,
    ) -> Self {
        Self { symbol: symbol.into(), kind, strike, expiration, contracts, premium }
    }

    /// Total purchase cost: contracts x premium x 100 shares.
    pub fn cost(&self) -> f64 {
        self.contracts as f64 * self.premium * 100.0
    }

    /// Value of the contract at spot price `spot`, as of `at`.
    /// Worth nothing after expiration.
    pub fn value_at(&self, spot: f64, at: DateTime<Utc>) -> f64 {
        if at > self.expiration {
            return 0.0;
        }

        let intrinsic = match self.kind {
            OptionKind::Call => (spot - self.strike).max(0.0),
            OptionKind::Put => (self.strike - spot).max(0.0),
        };

        (intrinsic - self.premium) * self.contracts as f64 * 100.0
    }
}
