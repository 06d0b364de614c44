//! Beam time reconstruction.
//!
//! Beam times in a scan file are decimal hours of day and wrap from 24 back
//! to 0 when a scan crosses midnight. The wrap is repaired first, then each
//! corrected offset is added to midnight of the header start date.

use chrono::{Duration, NaiveDate, NaiveDateTime};

/// A drop larger than this (hours) between consecutive beams is a day wrap.
pub const WRAP_THRESHOLD_H: f64 = -23.0;

const NANOS_PER_HOUR: f64 = 3600.0 * 1e9;

/// Indices where a new day starts, i.e. `i + 1` for every raw difference
/// `t[i + 1] - t[i] < -23`.
pub fn day_wrap_indices(offsets_h: &[f64]) -> Vec<usize> {
    offsets_h
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1] - w[0] < WRAP_THRESHOLD_H)
        .map(|(i, _)| i + 1)
        .collect()
}

/// Add 24 h to every offset after each detected wrap.
///
/// Wraps are detected on the raw sequence and corrections compound, so a
/// file spanning two midnights gets +24 h after the first and +48 h after
/// the second.
pub fn unwrap_day_wraps(offsets_h: &[f64]) -> Vec<f64> {
    let mut corrected = offsets_h.to_vec();
    for start in day_wrap_indices(offsets_h) {
        for t in &mut corrected[start..] {
            *t += 24.0;
        }
    }
    corrected
}

/// Convert corrected hour offsets to absolute instants.
///
/// Each offset is truncated to whole nanoseconds before being added to
/// midnight of `start_date`.
pub fn absolute_times(start_date: NaiveDate, offsets_h: &[f64]) -> Vec<NaiveDateTime> {
    let midnight = start_date.and_time(chrono::NaiveTime::MIN);
    offsets_h
        .iter()
        .map(|&hours| midnight + Duration::nanoseconds((hours * NANOS_PER_HOUR) as i64))
        .collect()
}

/// Wrap repair plus absolute conversion in one step.
pub fn reconstruct_times(start_date: NaiveDate, offsets_h: &[f64]) -> Vec<NaiveDateTime> {
    let wraps = day_wrap_indices(offsets_h).len();
    if wraps > 0 {
        log::debug!("repaired {} day wrap(s) in beam times", wraps);
    }
    absolute_times(start_date, &unwrap_day_wraps(offsets_h))
}

/// Seconds elapsed since the first instant, used for time binning.
pub fn seconds_since_first(times: &[NaiveDateTime]) -> Vec<f64> {
    let Some(&first) = times.first() else {
        return Vec::new();
    };
    times
        .iter()
        .map(|&t| {
            let dt = t - first;
            dt.num_nanoseconds()
                .map(|ns| ns as f64 * 1e-9)
                .unwrap_or_else(|| dt.num_milliseconds() as f64 * 1e-3)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 8, 30).unwrap()
    }

    #[test]
    fn test_no_wrap_is_identity() {
        let offsets = vec![6.0, 6.5, 7.25];
        assert_eq!(unwrap_day_wraps(&offsets), offsets);
        assert!(day_wrap_indices(&offsets).is_empty());
    }

    #[test]
    fn test_single_wrap() {
        let offsets = vec![23.9, 23.99, 0.01, 0.1];
        assert_eq!(day_wrap_indices(&offsets), vec![2]);

        let corrected = unwrap_day_wraps(&offsets);
        assert_eq!(corrected[1], 23.99);
        assert!((corrected[2] - 24.01).abs() < 1e-12);
        assert!((corrected[3] - 24.1).abs() < 1e-12);
    }

    #[test]
    fn test_multiple_wraps_compound_and_stay_monotonic() {
        let offsets = vec![22.0, 23.5, 0.5, 12.0, 23.9, 0.2, 5.0];
        let corrected = unwrap_day_wraps(&offsets);

        assert!(corrected.windows(2).all(|w| w[1] >= w[0]));
        assert!((corrected[2] - 24.5).abs() < 1e-12);
        assert!((corrected[5] - 48.2).abs() < 1e-12);
        assert!((corrected[6] - 53.0).abs() < 1e-12);
    }

    #[test]
    fn test_small_backwards_step_is_not_a_wrap() {
        let offsets = vec![10.0, 9.999, 10.01];
        assert_eq!(unwrap_day_wraps(&offsets), offsets);
    }

    #[test]
    fn test_absolute_times_nanosecond_truncation() {
        let times = absolute_times(date(), &[6.5, 24.25]);
        assert_eq!(
            times[0].format("%Y-%m-%d %H:%M:%S").to_string(),
            "2023-08-30 06:30:00"
        );
        assert_eq!(
            times[1].format("%Y-%m-%d %H:%M:%S").to_string(),
            "2023-08-31 00:15:00"
        );

        // 1 ns expressed in hours survives as a sub-second offset.
        let tiny = absolute_times(date(), &[1.0 / NANOS_PER_HOUR * 10.0]);
        let dt = tiny[0] - date().and_time(chrono::NaiveTime::MIN);
        assert!(dt.num_nanoseconds().unwrap() <= 10);
        assert!(dt.num_nanoseconds().unwrap() >= 9);
    }

    #[test]
    fn test_reconstruct_across_midnight() {
        let times = reconstruct_times(date(), &[23.999, 0.001]);
        assert!(times[1] > times[0]);
        assert_eq!(seconds_since_first(&times)[1].round(), 7.0);
    }

    #[test]
    fn test_seconds_since_first_empty() {
        assert!(seconds_since_first(&[]).is_empty());
    }
}
