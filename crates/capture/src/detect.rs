//! Face detectors.
//!
//! A detector inspects a color frame, draws whatever markers it wants onto
//! it, and reports whether a face is present.

use std::collections::VecDeque;

use camcast_common::config::DetectorKind;
use camcast_common::error::CamcastResult;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Detection collaborator used by the capture loop.
pub trait FaceDetector: Send {
    /// Returns `true` if a face is present. May annotate `frame` in place.
    fn detect(&mut self, frame: &mut RgbImage) -> CamcastResult<bool>;

    /// Detector name for logging.
    fn name(&self) -> &str;
}

/// Build the detector named by the config.
pub fn select_detector(kind: DetectorKind) -> Box<dyn FaceDetector> {
    match kind {
        DetectorKind::None => Box::new(NoopDetector),
        DetectorKind::BrightBlob => Box::new(BrightBlobDetector::default()),
    }
}

/// Never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

impl FaceDetector for NoopDetector {
    fn detect(&mut self, _frame: &mut RgbImage) -> CamcastResult<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Replays a fixed sequence of results, then reports `false` forever.
#[derive(Debug, Default, Clone)]
pub struct ScriptedDetector {
    script: VecDeque<bool>,
    calls: u64,
}

impl ScriptedDetector {
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: 0,
        }
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &mut RgbImage) -> CamcastResult<bool> {
        self.calls += 1;
        Ok(self.script.pop_front().unwrap_or(false))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Treats a large bright region as a face and boxes it.
///
/// A stand-in for a real classifier: it lets the recording triggers run
/// end to end with the test pattern or a lamp in front of a camera.
#[derive(Debug, Clone, Copy)]
pub struct BrightBlobDetector {
    /// Luma above which a pixel counts as bright.
    pub threshold: u8,
    /// Fraction of the frame that must be bright.
    pub min_fraction: f32,
}

impl Default for BrightBlobDetector {
    fn default() -> Self {
        Self {
            threshold: 230,
            min_fraction: 0.01,
        }
    }
}

impl FaceDetector for BrightBlobDetector {
    fn detect(&mut self, frame: &mut RgbImage) -> CamcastResult<bool> {
        let (w, h) = frame.dimensions();
        let mut count = 0u64;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0, 0);

        for (x, y, px) in frame.enumerate_pixels() {
            if luma(px) > self.threshold {
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        let total = (w as u64 * h as u64).max(1);
        if (count as f32 / total as f32) < self.min_fraction {
            return Ok(false);
        }

        let rect = Rect::at(min_x as i32, min_y as i32).of_size(max_x - min_x + 1, max_y - min_y + 1);
        draw_hollow_rect_mut(frame, rect, Rgb([255, 255, 255]));
        Ok(true)
    }

    fn name(&self) -> &str {
        "bright-blob"
    }
}

fn luma(px: &Rgb<u8>) -> u8 {
    let [r, g, b] = px.0;
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}
