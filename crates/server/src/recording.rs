//! Recording loop: appends the derived frame to a video sink while
//! recording is active.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use camcast_capture::{open_video_sink, FrameGeometry, VideoSink};
use camcast_common::clock::{recording_file_stem, remaining_in_tick, sleep_unless_stopped};
use camcast_common::config::RecordingConfig;
use camcast_common::error::CamcastResult;
use chrono::Local;

use crate::state::SharedCaptureState;

/// Opens a sink for a path at a frame rate.
pub type SinkOpener = Box<dyn FnMut(&Path, f64) -> CamcastResult<Box<dyn VideoSink>> + Send>;

/// Opener backed by GStreamer with the configured fourcc.
pub fn gst_sink_opener(fourcc: String, geometry: FrameGeometry) -> SinkOpener {
    Box::new(move |path, fps| open_video_sink(path, &fourcc, fps, geometry))
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordingStats {
    pub frames_appended: u64,
    pub sinks_opened: u64,
    pub append_errors: u64,
}

/// Sole owner of the video sink.
pub struct RecordingLoop {
    state: Arc<SharedCaptureState>,
    output_dir: PathBuf,
    reopen_per_session: bool,
    opener: SinkOpener,
    sink: Option<Box<dyn VideoSink>>,
    /// Set after a failed open; cleared at the next session boundary only
    /// when sinks are reopened per session.
    open_failed: bool,
    was_active: bool,
    stats: RecordingStats,
}

impl RecordingLoop {
    pub fn new(state: Arc<SharedCaptureState>, config: &RecordingConfig, opener: SinkOpener) -> Self {
        Self {
            state,
            output_dir: config.output_dir.clone(),
            reopen_per_session: config.reopen_per_session,
            opener,
            sink: None,
            open_failed: false,
            was_active: false,
            stats: RecordingStats::default(),
        }
    }

    pub fn stats(&self) -> RecordingStats {
        self.stats
    }

    /// Run until shutdown, then close the sink. Blocking.
    pub fn run(mut self) -> RecordingStats {
        tracing::info!(output_dir = %self.output_dir.display(), "Recording loop started");

        while !self.state.is_shutdown() {
            let started = Instant::now();
            self.tick();
            let wait = remaining_in_tick(self.state.sleep_interval(), started.elapsed());
            sleep_unless_stopped(wait, self.state.shutdown_flag());
        }

        self.close_sink();
        tracing::info!(
            frames = self.stats.frames_appended,
            sinks = self.stats.sinks_opened,
            "Recording loop stopped"
        );
        self.stats
    }

    /// One iteration: open on first activation, append while active.
    pub fn tick(&mut self) {
        let active = self.state.recording_active();

        if active {
            if self.sink.is_none() && self.may_open() {
                self.open_sink();
            }
            if let Some(sink) = self.sink.as_mut() {
                let frame = self.state.latest_frame();
                match sink.append(&frame) {
                    Ok(()) => self.stats.frames_appended += 1,
                    Err(e) => {
                        self.stats.append_errors += 1;
                        tracing::warn!(error = %e, "Failed to append frame to recording");
                    }
                }
            }
        } else if self.was_active && self.reopen_per_session {
            self.close_sink();
            self.open_failed = false;
        }

        self.was_active = active;
    }

    fn may_open(&self) -> bool {
        !self.open_failed && (self.stats.sinks_opened == 0 || self.reopen_per_session)
    }

    fn open_sink(&mut self) {
        let stem = recording_file_stem(&Local::now());
        let path = self.output_dir.join(format!("{stem}.avi"));
        match (self.opener)(&path, self.state.frame_rate_hz()) {
            Ok(sink) => {
                tracing::info!(path = %path.display(), "Recording to file");
                self.state.set_write_target_path(path);
                self.stats.sinks_opened += 1;
                self.sink = Some(sink);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Could not open recording file");
                self.open_failed = true;
            }
        }
    }

    fn close_sink(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let frames = sink.frames_written();
            match sink.close() {
                Ok(()) => tracing::info!(path = %sink.path().display(), frames, "Recording closed"),
                Err(e) => tracing::warn!(error = %e, "Failed to finalize recording"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use camcast_capture::MemorySink;
    use camcast_common::error::CamcastError;

    use super::*;

    fn state() -> Arc<SharedCaptureState> {
        Arc::new(SharedCaptureState::new(FrameGeometry::gray(4, 2), 30.0, Arc::default()).unwrap())
    }

    /// Opener that records every sink it hands out.
    fn memory_opener() -> (SinkOpener, Arc<Mutex<Vec<MemorySink>>>) {
        let opened: Arc<Mutex<Vec<MemorySink>>> = Arc::default();
        let log = opened.clone();
        let opener: SinkOpener = Box::new(move |path, _fps| {
            let sink = MemorySink::new(path);
            log.lock().unwrap().push(sink.clone());
            Ok(Box::new(sink) as Box<dyn VideoSink>)
        });
        (opener, opened)
    }

    fn config(reopen_per_session: bool) -> RecordingConfig {
        RecordingConfig {
            output_dir: PathBuf::from("/tmp/camcast"),
            reopen_per_session,
            ..RecordingConfig::default()
        }
    }

    #[test]
    fn test_idle_loop_opens_nothing() {
        let (opener, opened) = memory_opener();
        let mut recording = RecordingLoop::new(state(), &config(false), opener);
        recording.tick();
        recording.tick();
        assert!(opened.lock().unwrap().is_empty());
        assert_eq!(recording.stats(), RecordingStats::default());
    }

    #[test]
    fn test_appends_only_while_active() {
        let state = state();
        let (opener, opened) = memory_opener();
        let mut recording = RecordingLoop::new(state.clone(), &config(false), opener);

        state.set_recording_active(true);
        recording.tick();
        recording.tick();
        state.set_recording_active(false);
        recording.tick();

        let sinks = opened.lock().unwrap();
        assert_eq!(sinks.len(), 1);
        let rec = sinks[0].recording();
        assert_eq!(rec.frames.len(), 2);
        assert!(rec.frames.iter().all(|f| f.len() == 8));
        assert_eq!(rec.closes, 0);

        let target = state.write_target_path().unwrap();
        assert!(target.starts_with("/tmp/camcast"));
        assert!(target.to_string_lossy().contains("video_recording_"));
        assert_eq!(target.extension().and_then(|e| e.to_str()), Some("avi"));
    }

    #[test]
    fn test_single_sink_reused_across_sessions() {
        let state = state();
        let (opener, opened) = memory_opener();
        let mut recording = RecordingLoop::new(state.clone(), &config(false), opener);

        for active in [true, false, true, true] {
            state.set_recording_active(active);
            recording.tick();
        }
        let sinks = opened.lock().unwrap();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].recording().frames.len(), 3);
    }

    #[test]
    fn test_reopen_per_session_closes_and_reopens() {
        let state = state();
        let (opener, opened) = memory_opener();
        let mut recording = RecordingLoop::new(state.clone(), &config(true), opener);

        for active in [true, false, true] {
            state.set_recording_active(active);
            recording.tick();
        }
        let sinks = opened.lock().unwrap();
        assert_eq!(sinks.len(), 2);
        assert_eq!(sinks[0].recording().closes, 1);
        assert_eq!(sinks[1].recording().closes, 0);
        assert_eq!(recording.stats().sinks_opened, 2);
    }

    #[test]
    fn test_open_failure_is_not_retried() {
        let state = state();
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = attempts.clone();
        let opener: SinkOpener = Box::new(move |_path, _fps| {
            *counter.lock().unwrap() += 1;
            Err(CamcastError::recording("disk full"))
        });
        let mut recording = RecordingLoop::new(state.clone(), &config(false), opener);

        state.set_recording_active(true);
        recording.tick();
        recording.tick();
        assert_eq!(*attempts.lock().unwrap(), 1);
        assert_eq!(recording.stats().frames_appended, 0);
        assert_eq!(state.write_target_path(), None);
    }

    #[tokio::test]
    async fn test_run_closes_sink_exactly_once() {
        let state = state();
        let (opener, opened) = memory_opener();
        let recording = RecordingLoop::new(state.clone(), &config(false), opener);
        state.set_recording_active(true);

        let worker = tokio::task::spawn_blocking(move || recording.run());
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        state.request_shutdown();
        let stats = worker.await.unwrap();

        assert!(stats.frames_appended >= 1);
        let sinks = opened.lock().unwrap();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].recording().closes, 1);
    }
}
