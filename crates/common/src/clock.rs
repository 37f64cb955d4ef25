//! Clock and pacing utilities.
//!
//! The capture, recording, and session loops are all paced by a single
//! frame rate. This module provides utilities for:
//! - Converting between frame rate and tick interval
//! - Splitting long sleeps so a stop flag is observed promptly
//! - Wall-clock labels for overlays and recording file names

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// Longest single sleep slice taken by [`sleep_unless_stopped`].
pub const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Tick interval in microseconds for a frame rate in Hz.
///
/// Non-positive or non-finite rates yield `None`.
pub fn interval_micros(rate_hz: f64) -> Option<u64> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return None;
    }
    Some((1_000_000.0 / rate_hz).round() as u64)
}

/// Sleep for `duration`, waking early if `stop` becomes true.
///
/// Returns `false` if the sleep was cut short by the stop flag.
pub fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(MAX_SLEEP_SLICE));
    }
}

/// Remaining part of a tick interval after `elapsed` of work.
pub fn remaining_in_tick(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Label drawn on every frame, e.g. `2026-10-16 14:03:07`.
pub fn overlay_timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Stem of a recording file opened at `at`, e.g. `video_recording_14:03:07`.
pub fn recording_file_stem(at: &DateTime<Local>) -> String {
    format!("video_recording_{}", at.format("%H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_micros() {
        assert_eq!(interval_micros(30.0), Some(33_333));
        assert_eq!(interval_micros(1.0), Some(1_000_000));
        assert_eq!(interval_micros(1000.0), Some(1_000));
        assert_eq!(interval_micros(0.0), None);
        assert_eq!(interval_micros(-5.0), None);
        assert_eq!(interval_micros(f64::NAN), None);
    }

    #[test]
    fn test_sleep_unless_stopped_returns_early() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_unless_stopped(Duration::from_secs(5), &stop));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_unless_stopped_completes() {
        let stop = AtomicBool::new(false);
        assert!(sleep_unless_stopped(Duration::from_millis(20), &stop));
    }

    #[test]
    fn test_remaining_in_tick_saturates() {
        let interval = Duration::from_millis(33);
        assert_eq!(
            remaining_in_tick(interval, Duration::from_millis(10)),
            Duration::from_millis(23)
        );
        assert_eq!(
            remaining_in_tick(interval, Duration::from_millis(50)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_labels() {
        let at = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(overlay_timestamp(&at), "2026-01-02 03:04:05");
        assert_eq!(recording_file_stem(&at), "video_recording_03:04:05");
    }
}
