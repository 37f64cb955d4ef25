//! Shared capture state.
//!
//! One [`SharedCaptureState`] exists per server and is handed to every task
//! as an `Arc`. There is no lock around the record as a whole: every scalar
//! is its own atomic and the derived frame is swapped in through a `watch`
//! channel. Readers may see fields from slightly different moments (a new
//! pause flag next to an old frame, say); any such skew self-corrects within
//! one frame period. Toggles use `fetch_xor`, so concurrent toggles never
//! lose an update.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camcast_capture::FrameGeometry;
use camcast_common::clock::interval_micros;
use camcast_common::error::{CamcastError, CamcastResult};
use image::GrayImage;
use tokio::sync::watch;

/// Point-in-time copy of the control flags, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    pub frame_rate_hz: f64,
    pub sleep_interval_micros: u64,
    pub paused: bool,
    pub face_detection_enabled: bool,
    pub recording_active: bool,
    pub manual_recording: bool,
}

/// The single mutable record shared by the capture loop, the recording loop,
/// and every client session.
pub struct SharedCaptureState {
    geometry: FrameGeometry,
    frame: watch::Sender<Arc<[u8]>>,
    frame_rate_bits: AtomicU64,
    sleep_interval_micros: AtomicU64,
    paused: AtomicBool,
    face_detection_enabled: AtomicBool,
    recording_active: AtomicBool,
    manual_recording: AtomicBool,
    write_target_path: Mutex<Option<PathBuf>>,
    shutdown: Arc<AtomicBool>,
}

impl SharedCaptureState {
    /// Create the state with a black frame of `geometry`.
    pub fn new(
        geometry: FrameGeometry,
        frame_rate_hz: f64,
        shutdown: Arc<AtomicBool>,
    ) -> CamcastResult<Self> {
        let interval = interval_micros(frame_rate_hz).ok_or_else(|| {
            CamcastError::config(format!("Frame rate must be positive, got {frame_rate_hz}"))
        })?;
        let blank: Arc<[u8]> = Arc::from(vec![0u8; geometry.size_bytes()]);
        let (frame, _) = watch::channel(blank);

        Ok(Self {
            geometry,
            frame,
            frame_rate_bits: AtomicU64::new(frame_rate_hz.to_bits()),
            sleep_interval_micros: AtomicU64::new(interval),
            paused: AtomicBool::new(false),
            face_detection_enabled: AtomicBool::new(false),
            recording_active: AtomicBool::new(false),
            manual_recording: AtomicBool::new(false),
            write_target_path: Mutex::new(None),
            shutdown,
        })
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Length of every frame sent to clients. Constant for the server lifetime.
    pub fn frame_size_bytes(&self) -> usize {
        self.geometry.size_bytes()
    }

    /// The most recently published derived frame.
    pub fn latest_frame(&self) -> Arc<[u8]> {
        self.frame.borrow().clone()
    }

    /// Replace the derived frame. The length must match the startup geometry.
    pub fn publish_frame(&self, frame: GrayImage) -> CamcastResult<()> {
        let raw = frame.into_raw();
        if raw.len() != self.frame_size_bytes() {
            return Err(CamcastError::capture(format!(
                "Derived frame is {} bytes, expected {}",
                raw.len(),
                self.frame_size_bytes()
            )));
        }
        self.frame.send_replace(Arc::from(raw));
        Ok(())
    }

    pub fn frame_rate_hz(&self) -> f64 {
        f64::from_bits(self.frame_rate_bits.load(Ordering::SeqCst))
    }

    /// Set the frame rate and recompute the tick interval right after it.
    pub fn set_frame_rate(&self, rate_hz: f64) -> CamcastResult<()> {
        let interval = interval_micros(rate_hz).ok_or_else(|| {
            CamcastError::config(format!("Frame rate must be positive, got {rate_hz}"))
        })?;
        self.frame_rate_bits.store(rate_hz.to_bits(), Ordering::SeqCst);
        self.sleep_interval_micros.store(interval, Ordering::SeqCst);
        Ok(())
    }

    pub fn sleep_interval_micros(&self) -> u64 {
        self.sleep_interval_micros.load(Ordering::SeqCst)
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_micros(self.sleep_interval_micros())
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Flip the pause flag, returning the new value.
    pub fn toggle_paused(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn face_detection_enabled(&self) -> bool {
        self.face_detection_enabled.load(Ordering::Relaxed)
    }

    pub fn set_face_detection(&self, enabled: bool) {
        self.face_detection_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flip face detection, returning the new value.
    pub fn toggle_face_detection(&self) -> bool {
        !self.face_detection_enabled.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn recording_active(&self) -> bool {
        self.recording_active.load(Ordering::Relaxed)
    }

    pub fn set_recording_active(&self, active: bool) {
        self.recording_active.store(active, Ordering::Relaxed);
    }

    /// Flip the recording flag, returning the new value.
    pub fn toggle_recording(&self) -> bool {
        !self.recording_active.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn manual_recording(&self) -> bool {
        self.manual_recording.load(Ordering::Relaxed)
    }

    pub fn set_manual_recording(&self, manual: bool) {
        self.manual_recording.store(manual, Ordering::Relaxed);
    }

    /// Flip manual recording, returning the new value.
    pub fn toggle_manual_recording(&self) -> bool {
        !self.manual_recording.fetch_xor(true, Ordering::Relaxed)
    }

    /// File the recording loop is currently writing, if any.
    pub fn write_target_path(&self) -> Option<PathBuf> {
        match self.write_target_path.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_write_target_path(&self, path: PathBuf) {
        match self.write_target_path.lock() {
            Ok(mut guard) => *guard = Some(path),
            Err(poisoned) => *poisoned.into_inner() = Some(path),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Ask every loop to finish its current iteration and exit.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// The global shutdown flag, for helpers that poll it directly.
    pub fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            frame_rate_hz: self.frame_rate_hz(),
            sleep_interval_micros: self.sleep_interval_micros(),
            paused: self.paused(),
            face_detection_enabled: self.face_detection_enabled(),
            recording_active: self.recording_active(),
            manual_recording: self.manual_recording(),
        }
    }
}

impl std::fmt::Debug for SharedCaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCaptureState")
            .field("geometry", &self.geometry)
            .field("flags", &self.snapshot())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
