//! Wall-clock alignment for interval scanning.
//!
//! With a one-minute or longer interval the first scan window starts on the
//! next even multiple of the interval (10:00, 10:05, 10:10 for five minutes),
//! so that several collectors produce comparable timestamps.

use chrono::{DateTime, TimeDelta, TimeZone, Timelike};
use std::time::Duration;

/// The instant at which the first interval window should open.
pub fn next<Tz: TimeZone>(now: DateTime<Tz>, interval: Duration) -> DateTime<Tz> {
    let fallback = || now.clone() + TimeDelta::from_std(interval).unwrap_or(TimeDelta::zero());
    let minutes = (interval.as_secs() / 60) as i64;
    if minutes == 0 {
        return fallback();
    }
    let advance = minutes - i64::from(now.minute()) % minutes;
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .and_then(|t| t.checked_add_signed(TimeDelta::try_minutes(advance)?))
        .unwrap_or_else(fallback)
}

/// How long to wait from `now` until [`next`].
pub fn until<Tz: TimeZone>(now: DateTime<Tz>, interval: Duration) -> Duration {
    let target = next(now.clone(), interval);
    (target - now).to_std().unwrap_or(interval)
}
