//! General time utility functions

use chrono::{self, Utc};

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    if let Some(ns) = duration.num_nanoseconds() {
        Some(ns as f64 / NANOS_PER_SECOND as f64)
    }
    else {
        None
    }
}

/// Wall clock time as unix epoch seconds.
///
/// This is the timestamp written as the first column of every sample row.
pub fn unix_timestamp_s() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 
        + now.timestamp_subsec_nanos() as f64 / NANOS_PER_SECOND as f64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(
            duration_to_seconds(chrono::Duration::milliseconds(1500)),
            Some(1.5)
        );
        assert_eq!(duration_to_seconds(chrono::Duration::max_value()), None);
    }

    #[test]
    fn test_unix_timestamp_monotonic_enough() {
        let a = unix_timestamp_s();
        let b = unix_timestamp_s();

        // Sometime after 2020
        assert!(a > 1.6e9);
        assert!(b >= a);
    }
}
