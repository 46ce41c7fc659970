//! Property tests for the week-wrapping clock comparison.

use heatmiser_rs::clock::{check, clock_error, WeekTime};
use heatmiser_rs::config::ClockConfig;
use heatmiser_rs::error::TimeError;
use proptest::prelude::*;

fn week_time() -> impl Strategy<Value = WeekTime> {
    (1u8..=7, 0u8..24, 0u8..60, 0u8..60).prop_map(|(d, h, m, s)| WeekTime::new(d, h, m, s))
}

proptest! {
    /// The error is symmetric and never more than half a week.
    #[test]
    fn prop_error_symmetric_and_bounded(a in week_time(), b in week_time()) {
        let e = clock_error(&a, &b);
        prop_assert_eq!(e, clock_error(&b, &a));
        prop_assert!(e <= 7 * 86_400 / 2);
    }

    /// Shifting both times by the same amount leaves the error unchanged.
    #[test]
    fn prop_error_shift_invariant(a in week_time(), b in week_time(), shift in 0u32..604_800) {
        let move_by = |t: &WeekTime| {
            let s = (t.week_secs() + shift) % 604_800;
            WeekTime::new((s / 86_400 + 1) as u8, (s % 86_400 / 3600) as u8, (s % 3600 / 60) as u8, (s % 60) as u8)
        };
        prop_assert_eq!(clock_error(&a, &b), clock_error(&move_by(&a), &move_by(&b)));
    }
}

/// Tests the boundary between an acceptable clock and drift.
#[test]
fn test_drift_limit_is_inclusive() {
    let config = ClockConfig::default();
    let local = WeekTime::new(5, 10, 0, 0);
    assert_eq!(check(&local, &WeekTime::new(5, 10, 0, 20), &config), Ok(20));
    assert_eq!(
        check(&local, &WeekTime::new(5, 9, 59, 39), &config),
        Err(TimeError::Drift { seconds: 21 })
    );
}

/// Tests a small error within one day.
#[test]
fn test_same_day_error() {
    let local = WeekTime::new(4, 9, 33, 5);
    let remote = WeekTime::new(4, 9, 33, 0);
    assert_eq!(clock_error(&local, &remote), 5);
}
