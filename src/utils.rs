//! Utility functions for the rating engine

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Average of `sum` over `count`, zero when empty
pub fn average(sum: u64, count: u32) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Compare two averages exactly, without going through floats
pub fn compare_averages(sum_a: u64, count_a: u32, sum_b: u64, count_b: u32) -> Ordering {
    match (count_a, count_b) {
        (0, 0) => Ordering::Equal,
        (0, _) => 0u128.cmp(&(sum_b as u128)),
        (_, 0) => (sum_a as u128).cmp(&0u128),
        _ => (sum_a as u128 * count_b as u128).cmp(&(sum_b as u128 * count_a as u128)),
    }
}

/// Whether `since` lies within `window` before `now`
pub fn within_window(since: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    since.map(|at| now - at < window).unwrap_or(false)
}

/// Seconds left until `deadline`, never negative
pub fn seconds_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (deadline - now).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average() {
        assert_eq!(average(0, 0), 0.0);
        assert_eq!(average(9, 1), 9.0);
        assert_eq!(average(15, 2), 7.5);
    }

    #[test]
    fn test_compare_averages_exact() {
        // 2/3 vs 0.666... would be fragile as floats
        assert_eq!(compare_averages(2, 3, 4, 6), Ordering::Equal);
        assert_eq!(compare_averages(9, 1, 17, 2), Ordering::Greater);
        assert_eq!(compare_averages(0, 0, 1, 1), Ordering::Less);
        assert_eq!(compare_averages(0, 0, 0, 0), Ordering::Equal);
    }

    #[test]
    fn test_within_window() {
        let now = current_timestamp();
        assert!(within_window(Some(now - Duration::minutes(59)), now, Duration::hours(1)));
        assert!(!within_window(Some(now - Duration::minutes(61)), now, Duration::hours(1)));
        assert!(!within_window(None, now, Duration::hours(1)));
    }

    #[test]
    fn test_seconds_until() {
        let now = current_timestamp();
        assert_eq!(seconds_until(now + Duration::seconds(90), now), 90);
        assert_eq!(seconds_until(now - Duration::seconds(5), now), 0);
    }
}
