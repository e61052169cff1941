//! Market sessions — exchange timezones and regular trading hours.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// An exchange session: IANA timezone plus regular open and close times.
///
/// The close minute is inclusive; a bar stamped exactly at the close is
/// still part of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSession {
    /// New York Stock Exchange, 09:30-16:00 America/New_York
    Nyse,
    /// London Stock Exchange, 08:00-16:30 Europe/London
    Lse,
    /// Tokyo Stock Exchange, 09:00-15:30 Asia/Tokyo
    Tse,
}

impl MarketSession {
    pub fn zone(&self) -> Tz {
        match self {
            MarketSession::Nyse => chrono_tz::America::New_York,
            MarketSession::Lse => chrono_tz::Europe::London,
            MarketSession::Tse => chrono_tz::Asia::Tokyo,
        }
    }

    pub fn open_time(&self) -> NaiveTime {
        let (h, m) = match self {
            MarketSession::Nyse => (9, 30),
            MarketSession::Lse => (8, 0),
            MarketSession::Tse => (9, 0),
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    pub fn close_time(&self) -> NaiveTime {
        let (h, m) = match self {
            MarketSession::Nyse => (16, 0),
            MarketSession::Lse => (16, 30),
            MarketSession::Tse => (15, 30),
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Whether `timestamp` falls inside the session.
    ///
    /// Weekends in the exchange's local calendar are never in session.
    /// With `include_after_hours` the rest of the weekday is admitted
    /// regardless of the open/close times.
    pub fn is_open_at(&self, timestamp: DateTime<Utc>, include_after_hours: bool) -> bool {
        let local = timestamp.with_timezone(&self.zone());

        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }

        if include_after_hours {
            return true;
        }

        let time = local.time();
        time >= self.open_time() && time <= self.close_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn nyse_regular_hours() {
        // Monday 2024-01-08, 09:45 ET = 14:45 UTC (EST)
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 14, 45, 0).unwrap();
        assert!(MarketSession::Nyse.is_open_at(ts, false));

        // 08:00 ET is pre-market
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 13, 0, 0).unwrap();
        assert!(!MarketSession::Nyse.is_open_at(ts, false));
    }

    #[test]
    fn close_minute_is_inclusive() {
        // 16:00:00 ET exactly
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 21, 0, 0).unwrap();
        assert!(MarketSession::Nyse.is_open_at(ts, false));

        // 16:01 ET is after close
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 21, 1, 0).unwrap();
        assert!(!MarketSession::Nyse.is_open_at(ts, false));
    }

    #[test]
    fn weekends_skipped_even_after_hours() {
        // Saturday 2024-01-06, noon ET
        let ts = Utc.with_ymd_and_hms(2024, 1, 6, 17, 0, 0).unwrap();
        assert!(!MarketSession::Nyse.is_open_at(ts, false));
        assert!(!MarketSession::Nyse.is_open_at(ts, true));
    }

    #[test]
    fn after_hours_admitted_when_requested() {
        // Monday 04:00 ET
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        assert!(!MarketSession::Nyse.is_open_at(ts, false));
        assert!(MarketSession::Nyse.is_open_at(ts, true));
    }

    #[test]
    fn dst_shift_is_respected() {
        // 2024-07-08 is EDT (UTC-4): 09:30 ET = 13:30 UTC
        let ts = Utc.with_ymd_and_hms(2024, 7, 8, 13, 30, 0).unwrap();
        assert!(MarketSession::Nyse.is_open_at(ts, false));

        // The same UTC wall time in January is 08:30 ET, pre-market
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 13, 30, 0).unwrap();
        assert!(!MarketSession::Nyse.is_open_at(ts, false));
    }

    #[test]
    fn lse_and_tse_hours() {
        // Monday 2024-01-08 08:30 London = 08:30 UTC (GMT)
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 8, 30, 0).unwrap();
        assert!(MarketSession::Lse.is_open_at(ts, false));

        // Monday 2024-01-08 10:00 Tokyo = 01:00 UTC
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 1, 0, 0).unwrap();
        assert!(MarketSession::Tse.is_open_at(ts, false));
    }
}
