//! Video sinks for recorded frames.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camcast_common::error::{CamcastError, CamcastResult};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;

use crate::frame::FrameGeometry;
use crate::pipeline::{escape_path, launch_pipeline, start_pipeline, stop_pipeline, wait_for_eos};

/// Destination for derived frames while recording is active.
pub trait VideoSink: Send {
    /// Append one frame of exactly `geometry.size_bytes()` bytes.
    fn append(&mut self, frame: &[u8]) -> CamcastResult<()>;

    /// Flush and finalize the output. Calling it again is a no-op.
    fn close(&mut self) -> CamcastResult<()>;

    /// Output file.
    fn path(&self) -> &Path;

    /// Frames appended so far.
    fn frames_written(&self) -> u64;
}

/// Open a sink for `fourcc` at `path`.
pub fn open_video_sink(
    path: &Path,
    fourcc: &str,
    fps: f64,
    geometry: FrameGeometry,
) -> CamcastResult<Box<dyn VideoSink>> {
    if geometry.channels != 1 {
        return Err(CamcastError::unsupported(format!(
            "Only grayscale recording is supported, got {} channels",
            geometry.channels
        )));
    }
    match fourcc.to_ascii_uppercase().as_str() {
        "MJPG" => Ok(Box::new(GstVideoSink::open(path, fps, geometry)?)),
        other => Err(CamcastError::unsupported(format!(
            "No video sink for fourcc {other:?} (supported: MJPG)"
        ))),
    }
}

/// Motion-JPEG in AVI through a GStreamer `appsrc`.
pub struct GstVideoSink {
    path: PathBuf,
    geometry: FrameGeometry,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frames: u64,
    closed: bool,
}

impl GstVideoSink {
    pub fn open(path: &Path, fps: f64, geometry: FrameGeometry) -> CamcastResult<Self> {
        let location = escape_path(path);
        let fps = fps.round().max(1.0) as u32;
        let (w, h) = (geometry.width, geometry.height);
        let launch = format!(
            "appsrc name=src is-live=true format=time do-timestamp=true caps=video/x-raw,format=GRAY8,width={w},height={h},framerate={fps}/1 ! videoconvert ! jpegenc ! avimux ! filesink location=\"{location}\""
        );

        let pipeline = launch_pipeline("recording", &launch)?;
        let appsrc = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| CamcastError::recording("Recording pipeline has no appsrc"))?;
        start_pipeline("recording", &pipeline)
            .map_err(|e| CamcastError::recording(e.to_string()))?;

        tracing::info!(path = %path.display(), fps, "Recording sink opened");
        Ok(Self {
            path: path.to_path_buf(),
            geometry,
            pipeline,
            appsrc,
            frames: 0,
            closed: false,
        })
    }
}

impl VideoSink for GstVideoSink {
    fn append(&mut self, frame: &[u8]) -> CamcastResult<()> {
        if self.closed {
            return Err(CamcastError::recording("Sink already closed"));
        }
        if frame.len() != self.geometry.size_bytes() {
            return Err(CamcastError::recording(format!(
                "Frame is {} bytes, sink expects {}",
                frame.len(),
                self.geometry.size_bytes()
            )));
        }

        let data = pad_rows(frame, self.geometry.width as usize, self.geometry.height as usize);
        self.appsrc
            .push_buffer(gst::Buffer::from_mut_slice(data))
            .map_err(|e| CamcastError::recording(format!("Failed to push frame: {e:?}")))?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> CamcastResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // EOS lets avimux write its index; without it the file is unplayable.
        if let Err(e) = self.appsrc.end_of_stream() {
            tracing::warn!(error = ?e, "Failed to send EOS; recording may be truncated");
        } else {
            wait_for_eos("recording", &self.pipeline, Duration::from_secs(10));
        }
        stop_pipeline("recording", &self.pipeline)
            .map_err(|e| CamcastError::recording(e.to_string()))?;

        tracing::info!(path = %self.path.display(), frames = self.frames, "Recording sink closed");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl Drop for GstVideoSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close recording sink on drop");
        }
    }
}

/// GStreamer expects GRAY8 rows padded to a multiple of four bytes.
fn pad_rows(frame: &[u8], width: usize, height: usize) -> Vec<u8> {
    let stride = (width + 3) & !3;
    if stride == width {
        return frame.to_vec();
    }
    let mut padded = vec![0u8; stride * height];
    for y in 0..height {
        padded[y * stride..y * stride + width].copy_from_slice(&frame[y * width..(y + 1) * width]);
    }
    padded
}

/// What a [`MemorySink`] has received.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecording {
    pub frames: Vec<Vec<u8>>,
    pub closes: u32,
}

/// Keeps frames in memory. Clones share the same recording.
#[derive(Debug, Clone)]
pub struct MemorySink {
    path: PathBuf,
    inner: Arc<Mutex<MemoryRecording>>,
}

impl MemorySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Arc::default(),
        }
    }

    /// Snapshot of the frames and close calls so far.
    pub fn recording(&self) -> MemoryRecording {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_recording<T>(&self, f: impl FnOnce(&mut MemoryRecording) -> T) -> T {
        match self.inner.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl VideoSink for MemorySink {
    fn append(&mut self, frame: &[u8]) -> CamcastResult<()> {
        self.with_recording(|rec| rec.frames.push(frame.to_vec()));
        Ok(())
    }

    fn close(&mut self) -> CamcastResult<()> {
        self.with_recording(|rec| rec.closes += 1);
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.with_recording(|rec| rec.frames.len() as u64)
    }
}
