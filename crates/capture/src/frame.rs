//! Frame geometry and the grayscale derivation step.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use camcast_common::config::CaptureConfig;

/// Fixed dimensions of the frame sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel.
    pub channels: u32,
}

impl FrameGeometry {
    /// Single-channel geometry.
    pub const fn gray(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: 1,
        }
    }

    /// Payload length of one frame on the wire.
    pub fn size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// A black frame of this geometry.
    pub fn blank(&self) -> GrayImage {
        GrayImage::new(self.width, self.height)
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self::gray(640, 480)
    }
}

impl From<&CaptureConfig> for FrameGeometry {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            channels: config.channels,
        }
    }
}

/// Convert a captured frame to grayscale at the fixed output geometry.
///
/// Frames that already match the geometry are not resampled.
pub fn derive_gray(frame: &RgbImage, geometry: FrameGeometry) -> GrayImage {
    let gray = imageops::grayscale(frame);
    if gray.dimensions() == (geometry.width, geometry.height) {
        gray
    } else {
        imageops::resize(&gray, geometry.width, geometry.height, FilterType::Triangle)
    }
}
