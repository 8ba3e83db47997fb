//! Hour-boundary arithmetic shared by the scheduler and the pipeline.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};

use crate::utils::constants::AVAILABILITY_LAG_MINUTES;

pub fn one_hour() -> Duration {
    Duration::hours(1)
}

pub fn availability_lag() -> Duration {
    Duration::minutes(AVAILABILITY_LAG_MINUTES)
}

/// Truncate an instant to the start of its hour.
pub fn floor_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(one_hour()).unwrap_or_else(|_| {
        t.with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(t)
    })
}

/// Round an instant up to the next hour boundary; boundaries map to themselves.
pub fn ceil_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let floor = floor_hour(t);
    if floor == t {
        t
    } else {
        floor + one_hour()
    }
}

/// The most recent hour boundary whose preceding hour of data is fully ingested at `now`.
///
/// With a 30 minute lag: `floor_hour(now)` once the minute is >= 30, else the boundary before.
pub fn last_complete_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = floor_hour(now);
    if now - floor >= availability_lag() {
        floor
    } else {
        floor - one_hour()
    }
}

/// Instant at which the data for the hour boundary `hour` becomes available.
pub fn available_at(hour: DateTime<Utc>) -> DateTime<Utc> {
    hour + availability_lag()
}

/// Iterate the hour boundaries of `[start, end)`, starting from `floor_hour(start)`.
pub fn hours_in(start: DateTime<Utc>, end: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> {
    let mut current = floor_hour(start);
    std::iter::from_fn(move || {
        if current < end {
            let hour = current;
            current += one_hour();
            Some(hour)
        } else {
            None
        }
    })
}
