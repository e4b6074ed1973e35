//! Time-bucket helpers for the usage ledger and the rate limiter.
//!
//! The monthly ledger keys on the calendar month (`YYYY-MM`); the rate
//! limiter keys on wall-clock time truncated to the minute. Both helpers are
//! pure so the admission controllers and the dispatcher agree on bucket
//! boundaries.

use chrono::{DateTime, Utc};

/// Calendar-month key for the usage ledger, e.g. `2026-08`.
pub fn period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Current wall-clock period key.
pub fn current_period() -> String {
    period_key(Utc::now())
}

/// Truncate to the containing minute. Windows are tumbling, not sliding:
/// two calls in the same wall-clock minute share a bucket.
pub fn minute_window(now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = now.timestamp();
    let floored = secs - secs.rem_euclid(60);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_key_is_year_month() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 5).unwrap();
        assert_eq!(period_key(at), "2026-03");
    }

    #[test]
    fn minute_window_drops_seconds() {
        let base = Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 59).unwrap();
        assert_eq!(minute_window(late), base);
        assert_eq!(minute_window(base), base);
    }

    #[test]
    fn adjacent_minutes_get_distinct_windows() {
        let first = Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 59).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 3, 9, 14, 31, 0).unwrap();
        assert_ne!(minute_window(first), minute_window(second));
    }
}
