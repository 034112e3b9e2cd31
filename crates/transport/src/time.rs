//! Measure/second conversions shared by live playback and export.
//!
//! Positions are measured in measures on a zero-based axis. Both the playback
//! driver and the offline renderer go through [`seconds_per_measure`], so a
//! block lands at the same second in an export as it does live.

use std::time::Duration;

pub const BEATS_PER_MEASURE: f64 = 4.0;

/// Grid step of the transport clock and of block positions.
pub const TICK_MEASURES: f64 = 0.25;

/// First measure the editor addresses. New content is placed here.
pub const FIRST_MEASURE: f64 = 1.0;

/// Tempo range accepted by the transport and the renderer.
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 400.0;

pub fn is_valid_bpm(bpm: f64) -> bool {
    (MIN_BPM..=MAX_BPM).contains(&bpm)
}

pub fn seconds_per_measure(bpm: f64) -> f64 {
    60.0 / bpm * BEATS_PER_MEASURE
}

/// Period of the transport clock: a quarter of a beat.
pub fn tick_period(bpm: f64) -> Duration {
    Duration::from_secs_f64(60.0 / bpm / 4.0)
}

pub fn measures_to_seconds(measures: f64, bpm: f64) -> f64 {
    measures * seconds_per_measure(bpm)
}

pub fn seconds_to_measures(seconds: f64, bpm: f64) -> f64 {
    seconds / 60.0 * (bpm / BEATS_PER_MEASURE)
}

/// Length in measures of a block spanning `seconds` of audio, never shorter than one measure.
pub fn audio_duration_measures(seconds: f64, bpm: f64) -> f64 {
    seconds_to_measures(seconds, bpm).max(1.0)
}

/// Round to the nearest quarter measure.
pub fn snap_to_grid(measures: f64) -> f64 {
    (measures / TICK_MEASURES).round() * TICK_MEASURES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_per_measure_at_160_bpm() {
        assert!((seconds_per_measure(160.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_tick_period_is_quarter_beat() {
        assert_eq!(tick_period(120.0), Duration::from_millis(125));
        assert_eq!(tick_period(60.0), Duration::from_millis(250));
    }

    #[test]
    fn test_measures_seconds_inverse() {
        let seconds = measures_to_seconds(6.0, 160.0);
        assert!((seconds - 9.0).abs() < 1e-12);
        assert!((seconds_to_measures(seconds, 160.0) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_audio_duration_has_one_measure_floor() {
        assert_eq!(audio_duration_measures(0.2, 160.0), 1.0);
        assert!((audio_duration_measures(12.0, 160.0) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_bpm_range() {
        assert!(is_valid_bpm(120.0));
        assert!(is_valid_bpm(MIN_BPM));
        assert!(is_valid_bpm(MAX_BPM));
        for bpm in [0.0, -120.0, 1e-9, 1e12, f64::NAN, f64::INFINITY] {
            assert!(!is_valid_bpm(bpm), "{bpm} accepted");
        }
    }

    #[test]
    fn test_snap_to_grid() {
        assert_eq!(snap_to_grid(3.1), 3.0);
        assert_eq!(snap_to_grid(3.13), 3.25);
        assert_eq!(snap_to_grid(7.874), 7.75);
    }
}
