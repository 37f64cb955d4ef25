//! Control protocol.
//!
//! Clients send short ASCII decimal integers terminated by `\n`; the server
//! answers every session iteration with one raw frame. Reserved codes toggle
//! flags, any other value sets the frame rate.

use camcast_common::error::CamcastResult;

use crate::state::SharedCaptureState;

/// Largest inbound read per session iteration.
pub const MAX_COMMAND_BYTES: usize = 10;

pub const CODE_NOOP: i64 = 0;
pub const CODE_TOGGLE_FACE_DETECTION: i64 = 100;
pub const CODE_TOGGLE_PAUSE: i64 = 200;
pub const CODE_TOGGLE_MANUAL_RECORDING: i64 = 300;

/// A decoded control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Noop,
    ToggleFaceDetection,
    TogglePause,
    ToggleManualRecording,
    /// Any non-reserved code. Non-positive rates are rejected on apply.
    /// Rates high enough to round the tick interval to zero are accepted;
    /// the loops then run unpaced.
    SetFrameRate(i64),
}

impl ControlCommand {
    pub fn from_code(code: i64) -> Self {
        match code {
            CODE_NOOP => Self::Noop,
            CODE_TOGGLE_FACE_DETECTION => Self::ToggleFaceDetection,
            CODE_TOGGLE_PAUSE => Self::TogglePause,
            CODE_TOGGLE_MANUAL_RECORDING => Self::ToggleManualRecording,
            rate => Self::SetFrameRate(rate),
        }
    }

    /// Decode the bytes received in one read.
    pub fn parse(bytes: &[u8]) -> Self {
        Self::from_code(parse_code(bytes))
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Noop => CODE_NOOP,
            Self::ToggleFaceDetection => CODE_TOGGLE_FACE_DETECTION,
            Self::TogglePause => CODE_TOGGLE_PAUSE,
            Self::ToggleManualRecording => CODE_TOGGLE_MANUAL_RECORDING,
            Self::SetFrameRate(rate) => *rate,
        }
    }

    /// Mutate the shared state. Only a rejected frame rate fails.
    pub fn apply(&self, state: &SharedCaptureState) -> CamcastResult<()> {
        match *self {
            Self::Noop => {}
            Self::ToggleFaceDetection => {
                let enabled = state.toggle_face_detection();
                state.set_manual_recording(false);
                tracing::info!(enabled, "Face detection toggled");
            }
            Self::TogglePause => {
                let paused = state.toggle_paused();
                tracing::info!(paused, "Capture pause toggled");
            }
            Self::ToggleManualRecording => {
                let recording = state.toggle_recording();
                let manual = state.toggle_manual_recording();
                state.set_face_detection(false);
                tracing::info!(recording, manual, "Manual recording toggled");
            }
            Self::SetFrameRate(rate) => {
                state.set_frame_rate(rate as f64)?;
                let interval_us = state.sleep_interval_micros();
                if interval_us == 0 {
                    tracing::warn!(rate_hz = rate, "Frame rate leaves no tick interval; loops run unpaced");
                } else {
                    tracing::info!(rate_hz = rate, interval_us, "Frame rate changed");
                }
            }
        }
        Ok(())
    }
}

/// Integer value of the first line of `bytes`.
///
/// Leading whitespace is skipped, an optional sign is honoured, and digits
/// are read until the first non-digit. Anything else, including overflow,
/// yields `0`.
pub fn parse_code(bytes: &[u8]) -> i64 {
    let line = match bytes.iter().position(|&b| b == b'\n') {
        Some(end) => &bytes[..end],
        None => bytes,
    };
    let mut rest = line
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .copied()
        .peekable();

    let negative = match rest.peek() {
        Some(b'-') => {
            rest.next();
            true
        }
        Some(b'+') => {
            rest.next();
            false
        }
        _ => false,
    };

    let mut value: i64 = 0;
    for digit in rest.take_while(u8::is_ascii_digit) {
        value = match value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(digit - b'0')))
        {
            Some(v) => v,
            None => return 0,
        };
    }
    if negative {
        -value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use camcast_capture::FrameGeometry;
    use proptest::prelude::*;

    use super::*;

    fn state() -> SharedCaptureState {
        SharedCaptureState::new(FrameGeometry::gray(4, 4), 30.0, Arc::default()).unwrap()
    }

    #[test]
    fn test_parse_code_examples() {
        assert_eq!(parse_code(b"100\n"), 100);
        assert_eq!(parse_code(b"200"), 200);
        assert_eq!(parse_code(b"  15\n"), 15);
        assert_eq!(parse_code(b"-4\n"), -4);
        assert_eq!(parse_code(b"+7x"), 7);
        assert_eq!(parse_code(b"42abc"), 42);
        assert_eq!(parse_code(b"300\n100\n"), 300);
        assert_eq!(parse_code(b""), 0);
        assert_eq!(parse_code(b"\n"), 0);
        assert_eq!(parse_code(b"abc"), 0);
        assert_eq!(parse_code(b"99999999999999999999"), 0);
    }

    #[test]
    fn test_from_code_reserved() {
        assert_eq!(ControlCommand::from_code(0), ControlCommand::Noop);
        assert_eq!(ControlCommand::from_code(100), ControlCommand::ToggleFaceDetection);
        assert_eq!(ControlCommand::from_code(200), ControlCommand::TogglePause);
        assert_eq!(ControlCommand::from_code(300), ControlCommand::ToggleManualRecording);
        assert_eq!(ControlCommand::from_code(15), ControlCommand::SetFrameRate(15));
    }

    #[test]
    fn test_noop_changes_nothing() {
        let state = state();
        let before = state.snapshot();
        for _ in 0..5 {
            ControlCommand::Noop.apply(&state).unwrap();
        }
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_face_toggle_clears_manual_recording() {
        let state = state();
        state.set_manual_recording(true);
        ControlCommand::ToggleFaceDetection.apply(&state).unwrap();
        assert!(state.face_detection_enabled());
        assert!(!state.manual_recording());
    }

    #[test]
    fn test_manual_recording_forces_face_detection_off() {
        let state = state();
        state.set_face_detection(true);
        ControlCommand::ToggleManualRecording.apply(&state).unwrap();
        assert!(state.recording_active());
        assert!(state.manual_recording());
        assert!(!state.face_detection_enabled());

        ControlCommand::ToggleManualRecording.apply(&state).unwrap();
        assert!(!state.recording_active());
        assert!(!state.manual_recording());
        assert!(!state.face_detection_enabled());
    }

    #[test]
    fn test_set_frame_rate() {
        let state = state();
        ControlCommand::parse(b"15\n").apply(&state).unwrap();
        assert_eq!(state.frame_rate_hz(), 15.0);
        assert_eq!(state.sleep_interval_micros(), 66_667);
    }

    #[test]
    fn test_huge_frame_rate_leaves_zero_interval() {
        let state = state();
        ControlCommand::parse(b"5000000\n").apply(&state).unwrap();
        assert_eq!(state.frame_rate_hz(), 5_000_000.0);
        assert_eq!(state.sleep_interval_micros(), 0);
        assert_eq!(state.sleep_interval(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_negative_frame_rate_rejected() {
        let state = state();
        let before = state.snapshot();
        assert!(ControlCommand::parse(b"-5\n").apply(&state).is_err());
        assert_eq!(state.snapshot(), before);
    }

    proptest! {
        #[test]
        fn prop_decimal_round_trip(code in -1_000_000i64..1_000_000) {
            let text = format!("{code}\n");
            prop_assert_eq!(parse_code(text.as_bytes()), code);
            prop_assert_eq!(ControlCommand::from_code(code).code(), code);
        }

        #[test]
        fn prop_parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..MAX_COMMAND_BYTES)) {
            let _ = ControlCommand::parse(&bytes);
        }

        #[test]
        fn prop_toggle_twice_is_identity(code in prop_oneof![Just(100i64), Just(200i64)]) {
            let state = state();
            let before = state.snapshot();
            let command = ControlCommand::from_code(code);
            command.apply(&state).unwrap();
            prop_assert_ne!(state.snapshot(), before);
            command.apply(&state).unwrap();
            prop_assert_eq!(state.snapshot(), before);
        }

        #[test]
        fn prop_positive_rate_sets_interval(rate in 1i64..10_000) {
            let state = state();
            ControlCommand::SetFrameRate(rate).apply(&state).unwrap();
            prop_assert_eq!(state.frame_rate_hz(), rate as f64);
            prop_assert_eq!(state.sleep_interval_micros(), (1_000_000.0 / rate as f64).round() as u64);
        }
    }
}
