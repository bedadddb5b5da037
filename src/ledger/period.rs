//! Calendar-month billing periods, computed in UTC.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

fn to_utc(now_millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(now_millis).unwrap_or_default()
}

/// Key of the monthly period containing `now_millis`, e.g. `"2025-11"`.
pub fn period_key(now_millis: i64) -> String {
    let now = to_utc(now_millis);
    format!("{:04}-{:02}", now.year(), now.month())
}

/// First day of the calendar month after the one containing `now_millis`.
pub fn next_period_start(now_millis: i64) -> NaiveDate {
    let today = to_utc(now_millis).date_naive();
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(today)
}

/// Whole days from today (UTC) until the quota resets on the 1st of next month.
pub fn days_until_reset(now_millis: i64) -> u32 {
    let today = to_utc(now_millis).date_naive();
    let days = (next_period_start(now_millis) - today).num_days();
    u32::try_from(days).unwrap_or(0)
}
