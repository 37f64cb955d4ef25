//! Capture loop: grab, detect, derive, annotate, publish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camcast_capture::{
    derive_gray, Annotator, FaceDetector, FrameSource, OverlayStatus, RecordingBadge,
};
use camcast_common::clock::{overlay_timestamp, remaining_in_tick, sleep_unless_stopped};
use chrono::Local;

use crate::state::SharedCaptureState;
use crate::timer::CountdownHandle;

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub ticks: u64,
    pub frames_published: u64,
    pub paused_ticks: u64,
    pub capture_errors: u64,
    pub detections: u64,
}

/// Single producer of the derived frame.
pub struct CaptureLoop {
    state: Arc<SharedCaptureState>,
    source: Box<dyn FrameSource>,
    detector: Box<dyn FaceDetector>,
    annotator: Annotator,
    countdown: CountdownHandle,
    record_duration: Duration,
    /// Detection result for the current tick only.
    face_detected: bool,
    consecutive_failures: u64,
    stats: CaptureStats,
}

impl CaptureLoop {
    pub fn new(
        state: Arc<SharedCaptureState>,
        source: Box<dyn FrameSource>,
        detector: Box<dyn FaceDetector>,
        annotator: Annotator,
        countdown: CountdownHandle,
        record_duration: Duration,
    ) -> Self {
        Self {
            state,
            source,
            detector,
            annotator,
            countdown,
            record_duration,
            face_detected: false,
            consecutive_failures: 0,
            stats: CaptureStats::default(),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Run until shutdown. Blocking; call from a blocking thread.
    pub fn run(mut self) -> CaptureStats {
        tracing::info!(
            source = self.source.name(),
            detector = self.detector.name(),
            rate_hz = self.state.frame_rate_hz(),
            "Capture loop started"
        );

        while !self.state.is_shutdown() {
            let started = Instant::now();
            self.tick();
            let wait = remaining_in_tick(self.state.sleep_interval(), started.elapsed());
            sleep_unless_stopped(wait, self.state.shutdown_flag());
        }

        tracing::info!(
            ticks = self.stats.ticks,
            published = self.stats.frames_published,
            capture_errors = self.stats.capture_errors,
            detections = self.stats.detections,
            "Capture loop stopped"
        );
        self.stats
    }

    /// One iteration. A paused tick leaves the published frame alone.
    pub fn tick(&mut self) {
        self.stats.ticks += 1;
        if self.state.paused() {
            self.stats.paused_ticks += 1;
        } else {
            self.capture_and_publish();
        }
        self.face_detected = false;
    }

    fn capture_and_publish(&mut self) {
        let mut frame = match self.source.capture_frame() {
            Ok(frame) => {
                if self.consecutive_failures > 0 {
                    tracing::info!(
                        failures = self.consecutive_failures,
                        "Frame capture recovered"
                    );
                    self.consecutive_failures = 0;
                }
                frame
            }
            Err(e) => {
                self.stats.capture_errors += 1;
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    tracing::warn!(error = %e, "Frame capture failed; skipping tick");
                } else {
                    tracing::debug!(error = %e, "Frame capture failed; skipping tick");
                }
                return;
            }
        };

        if self.state.face_detection_enabled() {
            match self.detector.detect(&mut frame) {
                Ok(found) => self.face_detected = found,
                Err(e) => tracing::warn!(error = %e, "Face detection failed"),
            }
        }

        if self.face_detected {
            self.stats.detections += 1;
            if !self.state.recording_active() {
                tracing::info!(secs = self.record_duration.as_secs(), "Face detected; recording");
            }
            self.state.set_recording_active(true);
            self.countdown.arm(self.record_duration);
        }

        let mut gray = derive_gray(&frame, self.state.geometry());
        let status = self.overlay_status();
        self.annotator.render_overlay(&mut gray, &status);

        match self.state.publish_frame(gray) {
            Ok(()) => self.stats.frames_published += 1,
            Err(e) => tracing::error!(error = %e, "Derived frame rejected"),
        }
    }

    fn overlay_status(&self) -> OverlayStatus {
        let badge = if !self.state.recording_active() {
            RecordingBadge::Off
        } else if self.state.manual_recording() {
            RecordingBadge::Manual
        } else {
            let remaining_secs = self
                .countdown
                .remaining()
                .map(|left| left.as_secs_f64().ceil() as u64)
                .unwrap_or(0);
            RecordingBadge::Countdown { remaining_secs }
        };

        OverlayStatus {
            timestamp: overlay_timestamp(&Local::now()),
            face_detection: self.state.face_detection_enabled(),
            badge,
        }
    }
}

/// What the countdown does on expiry: end automatic recording unless the
/// operator switched to manual mode in the meantime.
pub fn expire_automatic_recording(state: &SharedCaptureState) {
    if state.manual_recording() {
        tracing::debug!("Countdown expired during manual recording; ignored");
        return;
    }
    if state.recording_active() {
        state.set_recording_active(false);
        tracing::info!("Automatic recording ended");
    }
}
