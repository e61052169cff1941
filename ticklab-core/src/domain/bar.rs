use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single OHLCV bar for one symbol at minute precision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self { symbol: symbol.into(), timestamp, open, high, low, close, volume }
    }

    /// Validate bar invariants
    pub fn validate(&self) -> Result<(), BarError> {
        for price in [self.open, self.high, self.low, self.close] {
            if !price.is_finite() {
                return Err(BarError::NonFinitePrice);
            }
        }
        if self.high < self.low {
            return Err(BarError::InvalidRange { high: self.high, low: self.low });
        }
        if self.open < 0.0 || self.high < 0.0 || self.low < 0.0 || self.close < 0.0 {
            return Err(BarError::NegativePrice);
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(BarError::NegativeVolume);
        }
        if !(self.low..=self.high).contains(&self.open) {
            return Err(BarError::OpenOutOfRange);
        }
        if !(self.low..=self.high).contains(&self.close) {
            return Err(BarError::CloseOutOfRange);
        }
        Ok(())
    }

    /// Timestamp truncated to minute precision.
    pub fn minute(&self) -> DateTime<Utc> {
        self.timestamp
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(self.timestamp)
    }

    /// Check if bar is bullish (close > open)
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Get bar range (high - low)
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Error)]
pub enum BarError {
    #[error("Invalid bar range: high={high}, low={low}")]
    InvalidRange { high: f64, low: f64 },

    #[error("NaN or infinite price not allowed")]
    NonFinitePrice,

    #[error("Negative price not allowed")]
    NegativePrice,

    #[error("Negative or non-finite volume not allowed")]
    NegativeVolume,

    #[error("Open price outside high/low range")]
    OpenOutOfRange,

    #[error("Close price outside high/low range")]
    CloseOutOfRange,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn validate_rejects_inverted_range() {
        let bar = Bar::new(
            "TSLA",
            Utc::now(),
            100.0,
            99.0, // high < low (invalid)
            101.0,
            100.0,
            1000.0,
        );
        assert!(bar.validate().is_err());
    }

    #[test]
    fn validate_accepts_valid_bar() {
        let bar = Bar::new("TSLA", Utc::now(), 100.0, 105.0, 95.0, 102.0, 1000.0);
        assert!(bar.validate().is_ok());
    }

    #[test]
    fn validate_rejects_negative_volume() {
        let bar = Bar::new("TSLA", Utc::now(), 100.0, 105.0, 95.0, 102.0, -100.0);
        assert!(matches!(bar.validate(), Err(BarError::NegativeVolume)));
    }

    #[test]
    fn validate_rejects_nan_price() {
        let bar = Bar::new("TSLA", Utc::now(), f64::NAN, 105.0, 95.0, 102.0, 100.0);
        assert!(matches!(bar.validate(), Err(BarError::NonFinitePrice)));
    }

    #[test]
    fn validate_rejects_close_outside_range() {
        let bar = Bar::new("TSLA", Utc::now(), 100.0, 105.0, 95.0, 110.0, 100.0);
        assert!(matches!(bar.validate(), Err(BarError::CloseOutOfRange)));
    }

    #[test]
    fn minute_truncates_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 14, 30, 42).unwrap();
        let bar = Bar::new("TSLA", ts, 100.0, 105.0, 95.0, 102.0, 1000.0);
        assert_eq!(bar.minute(), Utc.with_ymd_and_hms(2024, 1, 8, 14, 30, 0).unwrap());
    }
}
