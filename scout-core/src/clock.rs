//! Arithmetic on the 3600-second hourly clock.
//!
//! Every value handed out by this module is a true modulo in `0..3600`, so
//! negative intermediates (e.g. `latest_seen - 60` near the top of the hour)
//! wrap instead of going negative.

use serde::{Deserialize, Serialize};

use crate::constants::HOUR_SECS;

/// Seconds after the hour for any signed second count.
pub fn clock_mod(value: i64) -> u32 {
    value.rem_euclid(HOUR_SECS) as u32
}

/// Minute * 60 + second of a UTC unix timestamp.
pub fn secs_of_hour(unix_secs: i64) -> u32 {
    clock_mod(unix_secs)
}

/// Unix timestamp of the start of the hour containing `unix_secs`.
pub fn hour_start(unix_secs: i64) -> i64 {
    unix_secs - unix_secs.rem_euclid(HOUR_SECS)
}

/// Circular between-test, inclusive at both ends. A window whose start
/// equals its end contains nothing.
pub fn clock_between(start: u32, test: u32, end: u32) -> bool {
    if start < end {
        start <= test && test <= end
    } else if start > end {
        test >= start || test <= end
    } else {
        false
    }
}

/// Forward distance from `start` to `end` around the clock.
pub fn clock_span(start: u32, end: u32) -> u32 {
    clock_mod(i64::from(end) - i64::from(start))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockInterval {
    pub start: u32,
    pub end: u32,
}

impl ClockInterval {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: start % HOUR_SECS as u32,
            end: end % HOUR_SECS as u32,
        }
    }

    pub fn span(&self) -> u32 {
        clock_span(self.start, self.end)
    }

    pub fn contains(&self, test: u32) -> bool {
        clock_between(self.start, test, self.end)
    }

    /// Union of two overlapping intervals, or `None` when they are disjoint.
    fn absorb(self, other: Self) -> Option<Self> {
        match (self.contains(other.start), self.contains(other.end)) {
            (true, true) => Some(self),
            (true, false) => Some(Self::new(self.start, other.end)),
            (false, true) => Some(Self::new(other.start, self.end)),
            (false, false) if other.contains(self.start) => Some(other),
            (false, false) => None,
        }
    }
}

/// Merges overlapping circular intervals until no pair overlaps any more.
pub fn merge_intervals(intervals: impl IntoIterator<Item = ClockInterval>) -> Vec<ClockInterval> {
    let mut merged: Vec<ClockInterval> = intervals
        .into_iter()
        .filter(|interval| interval.start != interval.end)
        .collect();

    'fixed_point: loop {
        for i in 0..merged.len() {
            for j in (i + 1)..merged.len() {
                if let Some(union) = merged[i].absorb(merged[j]) {
                    merged[i] = union;
                    merged.remove(j);
                    continue 'fixed_point;
                }
            }
        }
        return merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_mod_wraps_negative_values() {
        assert_eq!(clock_mod(-1), 3599);
        assert_eq!(clock_mod(-3600), 0);
        assert_eq!(clock_mod(-3661), 3539);
        assert_eq!(clock_mod(7205), 5);
    }

    #[test]
    fn between_handles_wrapping_windows() {
        assert!(clock_between(100, 150, 200));
        assert!(clock_between(100, 100, 200));
        assert!(!clock_between(100, 250, 200));
        assert!(clock_between(3500, 10, 200));
        assert!(clock_between(3500, 3550, 200));
        assert!(clock_between(3500, 3500, 200));
        assert!(clock_between(3500, 200, 200));
        assert!(!clock_between(3500, 300, 200));
        assert!(!clock_between(500, 500, 500));
    }

    #[test]
    fn span_is_forward_distance() {
        assert_eq!(clock_span(100, 200), 100);
        assert_eq!(clock_span(3500, 100), 200);
        assert_eq!(clock_span(200, 100), 3500);
    }

    #[test]
    fn merge_chains_overlapping_intervals() {
        let merged = merge_intervals([
            ClockInterval::new(100, 300),
            ClockInterval::new(1000, 1200),
            ClockInterval::new(250, 500),
            ClockInterval::new(450, 1050),
        ]);
        assert_eq!(merged, vec![ClockInterval::new(100, 1200)]);
    }

    #[test]
    fn merge_handles_wrap_and_containment() {
        let merged = merge_intervals([
            ClockInterval::new(3400, 100),
            ClockInterval::new(50, 400),
            ClockInterval::new(2000, 2100),
            ClockInterval::new(1900, 2200),
        ]);
        assert_eq!(
            merged,
            vec![ClockInterval::new(3400, 400), ClockInterval::new(1900, 2200)]
        );
    }

    #[test]
    fn merge_drops_empty_intervals() {
        assert!(merge_intervals([ClockInterval::new(10, 10)]).is_empty());
    }
}
