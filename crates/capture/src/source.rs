//! Frame sources.
//!
//! The capture loop only sees [`FrameSource`]. A failed capture is a soft
//! error: the loop logs it and skips the tick, so sources must be able to
//! recover on a later call (the camera source reopens its pipeline).

use std::time::{Duration, Instant};

use camcast_common::config::{CaptureConfig, SourceKind};
use camcast_common::error::{CamcastError, CamcastResult};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;

use crate::pipeline::{escape_path, launch_pipeline, start_pipeline, stop_pipeline};

/// Something that produces color frames on demand.
pub trait FrameSource: Send {
    /// Acquire the next frame. Errors are transient.
    fn capture_frame(&mut self) -> CamcastResult<RgbImage>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Open the source named by the capture config.
pub fn select_source(config: &CaptureConfig) -> Box<dyn FrameSource> {
    match config.source {
        SourceKind::Camera => Box::new(GstCameraSource::new(
            &config.device,
            config.width,
            config.height,
        )),
        SourceKind::TestPattern => Box::new(TestPatternSource::new(config.width, config.height)),
    }
}

/// Synthetic source: a dark gradient with a bright marker orbiting the center.
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    tick: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }

    /// Number of frames produced so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }
}

impl FrameSource for TestPatternSource {
    fn capture_frame(&mut self) -> CamcastResult<RgbImage> {
        let (w, h) = (self.width, self.height);
        let mut img = RgbImage::from_fn(w, h, |x, y| {
            let shade = ((x + y) * 60 / (w + h).max(1)) as u8;
            Rgb([shade + 20, shade + 20, shade + 30])
        });

        // Four corner blocks keep frame edges identifiable after scaling.
        let block = (w.min(h) / 12).max(1);
        for (x, y) in [(0, 0), (w - block, 0), (0, h - block), (w - block, h - block)] {
            draw_filled_rect_mut(
                &mut img,
                Rect::at(x as i32, y as i32).of_size(block, block),
                Rgb([90, 90, 90]),
            );
        }

        let angle = (self.tick % 120) as f32 / 120.0 * std::f32::consts::TAU;
        let orbit = w.min(h) as f32 / 4.0;
        let cx = w as f32 / 2.0 + orbit * angle.cos();
        let cy = h as f32 / 2.0 + orbit * angle.sin();
        draw_filled_circle_mut(
            &mut img,
            (cx as i32, cy as i32),
            (w.min(h) / 10).max(1) as i32,
            Rgb([250, 250, 250]),
        );

        self.tick += 1;
        Ok(img)
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

/// How long to wait for a sample before reporting a dropped tick.
const PULL_TIMEOUT: Duration = Duration::from_millis(500);

/// Minimum spacing between attempts to (re)open the camera.
const REOPEN_BACKOFF: Duration = Duration::from_secs(2);

/// V4L2 camera through a GStreamer `appsink`, converted to packed RGB.
///
/// The pipeline is opened lazily and torn down on bus errors, so an unplugged
/// or missing camera turns into skipped ticks until it comes back.
pub struct GstCameraSource {
    device: String,
    width: u32,
    height: u32,
    active: Option<(gst::Pipeline, gst_app::AppSink)>,
    last_open_attempt: Option<Instant>,
}

impl GstCameraSource {
    pub fn new(device: &str, width: u32, height: u32) -> Self {
        Self {
            device: device.to_string(),
            width,
            height,
            active: None,
            last_open_attempt: None,
        }
    }

    fn launch_string(&self) -> String {
        let device = escape_path(std::path::Path::new(&self.device));
        let (w, h) = (self.width, self.height);
        // Only the newest frame is kept.
        format!(
            "v4l2src device=\"{device}\" ! videoconvert ! videoscale ! video/x-raw,format=RGB,width={w},height={h} ! appsink name=sink max-buffers=1 drop=true sync=false"
        )
    }

    fn open(&mut self) -> CamcastResult<()> {
        if let Some(last) = self.last_open_attempt {
            if last.elapsed() < REOPEN_BACKOFF {
                return Err(CamcastError::capture(format!(
                    "Camera {} unavailable; waiting before reopening",
                    self.device
                )));
            }
        }
        self.last_open_attempt = Some(Instant::now());

        let pipeline = launch_pipeline("camera", &self.launch_string())?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| CamcastError::capture("Camera pipeline has no appsink"))?;
        if let Err(e) = start_pipeline("camera", &pipeline) {
            let _ = stop_pipeline("camera", &pipeline);
            return Err(e);
        }

        tracing::info!(device = %self.device, width = self.width, height = self.height, "Camera opened");
        self.active = Some((pipeline, appsink));
        Ok(())
    }

    fn close(&mut self) {
        if let Some((pipeline, _)) = self.active.take() {
            if let Err(e) = stop_pipeline("camera", &pipeline) {
                tracing::warn!(error = %e, "Failed to stop camera pipeline");
            }
        }
    }

    fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
        let bus = pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(e) => Some(e.error().to_string()),
            _ => None,
        }
    }
}

impl FrameSource for GstCameraSource {
    fn capture_frame(&mut self) -> CamcastResult<RgbImage> {
        if self.active.is_none() {
            self.open()?;
        }
        let bus_error = self
            .active
            .as_ref()
            .and_then(|(pipeline, _)| Self::bus_error(pipeline));
        if let Some(error) = bus_error {
            self.close();
            return Err(CamcastError::capture(format!("Camera pipeline error: {error}")));
        }

        let Some((_, appsink)) = self.active.as_ref() else {
            return Err(CamcastError::capture("Camera not open"));
        };

        let sample = appsink
            .try_pull_sample(gst::ClockTime::from_nseconds(PULL_TIMEOUT.as_nanos() as u64))
            .ok_or_else(|| {
                CamcastError::capture(format!("No frame from {} within {PULL_TIMEOUT:?}", self.device))
            })?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| CamcastError::capture("Camera sample carried no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|e| CamcastError::capture(format!("Failed to map camera buffer: {e}")))?;

        let packed = pack_rows(map.as_slice(), self.width, self.height, 3)?;
        RgbImage::from_raw(self.width, self.height, packed)
            .ok_or_else(|| CamcastError::capture("Camera buffer does not match frame geometry"))
    }

    fn name(&self) -> &str {
        "camera"
    }
}

impl Drop for GstCameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Strip GStreamer's 4-byte row alignment padding, if any.
fn pack_rows(data: &[u8], width: u32, height: u32, bpp: u32) -> CamcastResult<Vec<u8>> {
    let row = (width * bpp) as usize;
    let rows = height as usize;
    if data.len() == row * rows {
        return Ok(data.to_vec());
    }

    let stride = (row + 3) & !3;
    if data.len() < stride * (rows - 1) + row {
        return Err(CamcastError::capture(format!(
            "Camera buffer too short: {} bytes for {width}x{height}",
            data.len()
        )));
    }
    let mut packed = Vec::with_capacity(row * rows);
    for y in 0..rows {
        packed.extend_from_slice(&data[y * stride..y * stride + row]);
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_has_requested_size_and_moves() {
        let mut source = TestPatternSource::new(160, 120);
        let first = source.capture_frame().unwrap();
        let second = source.capture_frame().unwrap();
        assert_eq!(first.dimensions(), (160, 120));
        assert_ne!(first.as_raw(), second.as_raw());
        assert_eq!(source.ticks(), 2);
    }

    #[test]
    fn test_select_source_test_pattern() {
        let config = CaptureConfig {
            source: SourceKind::TestPattern,
            ..CaptureConfig::default()
        };
        let mut source = select_source(&config);
        assert_eq!(source.name(), "test-pattern");
        assert_eq!(source.capture_frame().unwrap().dimensions(), (640, 480));
    }

    #[test]
    fn test_pack_rows_passthrough() {
        let data = vec![7u8; 4 * 3 * 2];
        assert_eq!(pack_rows(&data, 4, 2, 3).unwrap(), data);
    }

    #[test]
    fn test_pack_rows_strips_padding() {
        // 5 px * 3 bytes = 15, padded to a stride of 16.
        let mut data = Vec::new();
        for y in 0..2u8 {
            data.extend(std::iter::repeat(y + 1).take(15));
            data.push(0xff);
        }
        let packed = pack_rows(&data, 5, 2, 3).unwrap();
        assert_eq!(packed.len(), 30);
        assert!(packed[..15].iter().all(|&b| b == 1));
        assert!(packed[15..].iter().all(|&b| b == 2));
    }

    #[test]
    fn test_pack_rows_rejects_short_buffer() {
        assert!(pack_rows(&[0u8; 10], 5, 2, 3).is_err());
    }
}
