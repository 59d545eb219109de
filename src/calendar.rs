//! Trading-day date arithmetic.
//!
//! Weekend-skipping helpers used by the overcorrection monitor and the
//! earnings window check. Exchange holidays are out of scope: the monitor's
//! resolution windows are several days wide, so a missed holiday shifts a
//! resolution check by at most one session.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// True if `date` falls on a weekday trading session.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Advance `date` by `n` trading days, skipping weekends.
///
/// `n = 0` returns the next trading day at or after `date`.
pub fn add_trading_days(date: NaiveDate, n: u32) -> NaiveDate {
    let mut d = date;
    let mut remaining = n;
    while remaining > 0 {
        d += Duration::days(1);
        if is_trading_day(d) {
            remaining -= 1;
        }
    }
    while !is_trading_day(d) {
        d += Duration::days(1);
    }
    d
}

/// Count trading days strictly between `from` and `to` (exclusive bounds).
///
/// Returns 0 when `to <= from`.
pub fn trading_days_between(from: NaiveDate, to: NaiveDate) -> u32 {
    if to <= from {
        return 0;
    }
    let mut d = from + Duration::days(1);
    let mut count = 0;
    while d < to {
        if is_trading_day(d) {
            count += 1;
        }
        d += Duration::days(1);
    }
    count
}

/// True if `date` is within `window` trading days of `anchor` (either side).
pub fn within_trading_days(date: NaiveDate, anchor: NaiveDate, window: u32) -> bool {
    let (lo, hi) = if date <= anchor { (date, anchor) } else { (anchor, date) };
    if lo == hi {
        return true;
    }
    trading_days_between(lo, hi) < window
}
