//! Server assembly and lifecycle.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use camcast_capture::{
    select_detector, select_source, Annotator, FaceDetector, FrameGeometry, FrameSource,
};
use camcast_common::config::{AppConfig, RecordingConfig};
use camcast_common::error::{CamcastError, CamcastResult};

use crate::acceptor::{Acceptor, ServerMonitor};
use crate::capture_loop::{expire_automatic_recording, CaptureLoop, CaptureStats};
use crate::recording::{gst_sink_opener, RecordingLoop, RecordingStats, SinkOpener};
use crate::registry::ReclaimTotals;
use crate::state::SharedCaptureState;
use crate::timer::CountdownTimer;

/// The swappable parts of the pipeline.
pub struct Collaborators {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn FaceDetector>,
    pub annotator: Annotator,
    pub sink_opener: SinkOpener,
}

impl Collaborators {
    /// Camera or test pattern, detector, font, and GStreamer sink as configured.
    pub fn from_config(config: &AppConfig) -> Self {
        let geometry = FrameGeometry::from(&config.capture);
        Self {
            source: select_source(&config.capture),
            detector: select_detector(config.capture.detector),
            annotator: Annotator::new(&config.overlay),
            sink_opener: gst_sink_opener(config.recording.fourcc.clone(), geometry),
        }
    }
}

/// What the server did over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerReport {
    pub capture: CaptureStats,
    pub recording: RecordingStats,
    pub sessions: ReclaimTotals,
}

/// A bound server, ready to run.
pub struct StreamServer {
    state: Arc<SharedCaptureState>,
    acceptor: Acceptor,
    collaborators: Collaborators,
    recording: RecordingConfig,
    record_duration: Duration,
}

impl StreamServer {
    /// Validate the config, prepare the output directory, and bind.
    ///
    /// Any failure here is fatal for startup.
    pub fn bind(
        config: &AppConfig,
        collaborators: Collaborators,
        shutdown: Arc<AtomicBool>,
    ) -> CamcastResult<Self> {
        config.validate()?;

        let output_dir = &config.recording.output_dir;
        std::fs::create_dir_all(output_dir).map_err(|e| {
            CamcastError::config(format!(
                "Cannot create output directory {}: {e}",
                output_dir.display()
            ))
        })?;

        let geometry = FrameGeometry::from(&config.capture);
        let state = Arc::new(SharedCaptureState::new(
            geometry,
            config.capture.frame_rate_hz,
            shutdown,
        )?);
        let acceptor = Acceptor::bind(state.clone(), &config.server)?;

        tracing::info!(
            addr = %acceptor.local_addr(),
            width = geometry.width,
            height = geometry.height,
            frame_bytes = geometry.size_bytes(),
            rate_hz = config.capture.frame_rate_hz,
            "Server ready"
        );

        Ok(Self {
            state,
            acceptor,
            collaborators,
            recording: config.recording.clone(),
            record_duration: Duration::from_secs(config.recording.duration_secs),
        })
    }

    /// Override the automatic recording length.
    pub fn with_record_duration(mut self, duration: Duration) -> Self {
        self.record_duration = duration;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn state(&self) -> Arc<SharedCaptureState> {
        self.state.clone()
    }

    pub fn monitor(&self) -> Arc<ServerMonitor> {
        self.acceptor.monitor()
    }

    /// Run until the shutdown flag is set.
    ///
    /// Shutdown order: the acceptor stops admitting clients, the capture and
    /// recording loops are joined, every session is joined, and finally the
    /// listener is closed.
    pub async fn run(self) -> CamcastResult<ServerReport> {
        let Self {
            state,
            mut acceptor,
            collaborators,
            recording,
            record_duration,
        } = self;

        let expiring = state.clone();
        let timer = CountdownTimer::spawn(move || expire_automatic_recording(&expiring));

        let capture = CaptureLoop::new(
            state.clone(),
            collaborators.source,
            collaborators.detector,
            collaborators.annotator,
            timer.handle(),
            record_duration,
        );
        let recorder = RecordingLoop::new(state.clone(), &recording, collaborators.sink_opener);

        let capture_task = tokio::task::spawn_blocking(move || capture.run());
        let recording_task = tokio::task::spawn_blocking(move || recorder.run());

        acceptor.accept_until_shutdown().await;

        let capture_stats = capture_task
            .await
            .map_err(|e| CamcastError::capture(format!("Capture loop panicked: {e}")))?;
        let recording_stats = recording_task
            .await
            .map_err(|e| CamcastError::recording(format!("Recording loop panicked: {e}")))?;
        timer.shutdown().await;

        let sessions = acceptor.finish().await;
        tracing::info!(
            sessions = sessions.sessions,
            frames_sent = sessions.frames_sent,
            recorded = recording_stats.frames_appended,
            "Server stopped"
        );

        Ok(ServerReport {
            capture: capture_stats,
            recording: recording_stats,
            sessions,
        })
    }
}
