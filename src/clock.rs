//! Wall-clock abstraction
//!
//! Every component that stamps or compares times (ledger, delay nodes,
//! stuck-status thresholds, continuation sweep) reads time through [`Clock`]
//! so tests can drive time by hand.

use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Convert a timestamp to the epoch-millisecond form used in storage.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Like [`to_millis`] but rounds a sub-millisecond remainder up, so a stored
/// deadline is never earlier than the real one.
pub fn to_millis_ceil(at: DateTime<Utc>) -> i64 {
    let millis = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis + 1
    }
}

/// Inverse of [`to_millis`]. `None` for out-of-range values.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn deadlines_round_up_to_the_next_millisecond() {
        let whole = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_millis_ceil(whole), to_millis(whole));

        let partial = whole + Duration::microseconds(900);
        assert_eq!(to_millis(partial), to_millis(whole));
        assert_eq!(to_millis_ceil(partial), to_millis(whole) + 1);
    }
}
