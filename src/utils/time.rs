//! UTC window math
//!
//! All daily counters (quota, budget, analytics) share one reset instant:
//! midnight UTC. The helpers here produce the day stamp used in store keys
//! and the reset timestamps surfaced to callers.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Day stamp for the current UTC day, e.g. `20260805`.
pub fn day_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}

/// Day stamp for an arbitrary date.
pub fn day_stamp_for(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// The next midnight UTC strictly after `now`.
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    let midnight = tomorrow.and_hms_opt(0, 0, 0).unwrap_or(NaiveDateTime::MIN);
    Utc.from_utc_datetime(&midnight)
}

/// Seconds from `now` until the shared daily reset instant.
///
/// Never returns zero so TTLs derived from it are always valid.
pub fn seconds_until_reset(now: DateTime<Utc>) -> u64 {
    let delta = next_utc_midnight(now) - now;
    delta.num_seconds().max(1) as u64
}
