//! Timestamp and status overlay drawn on every derived frame.
//!
//! Text needs a TrueType font. Without one the annotator still draws the
//! recording indicator, so a recording frame is always distinguishable.

use std::path::{Path, PathBuf};

use camcast_common::config::{OverlayConfig, MAX_FONT_SCALE};
use camcast_common::error::{CamcastError, CamcastResult};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use rusttype::{point, Font, Scale};

const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// Recording part of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingBadge {
    Off,
    /// Automatic recording with whole seconds left on the countdown.
    Countdown { remaining_secs: u64 },
    Manual,
}

impl RecordingBadge {
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Off => None,
            Self::Countdown { remaining_secs } => Some(format!("RECORDING {remaining_secs}s")),
            Self::Manual => Some("RECORDING MANUAL".to_string()),
        }
    }
}

/// Everything drawn on one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayStatus {
    pub timestamp: String,
    pub face_detection: bool,
    pub badge: RecordingBadge,
}

impl OverlayStatus {
    pub fn mode_text(&self) -> &'static str {
        if self.face_detection {
            "FACE DETECT: ON"
        } else {
            "FACE DETECT: OFF"
        }
    }
}

fn clamp_scale(scale: f32) -> f32 {
    if scale.is_finite() {
        scale.clamp(1.0, MAX_FONT_SCALE)
    } else {
        OverlayConfig::default().font_scale
    }
}

/// Draws [`OverlayStatus`] onto grayscale frames.
pub struct Annotator {
    font: Option<Font<'static>>,
    scale: f32,
}

impl Annotator {
    /// Load the configured font, or the first well-known system font.
    pub fn new(config: &OverlayConfig) -> Self {
        let font = match &config.font_path {
            Some(path) => match load_font(path) {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(error = %e, "Configured overlay font unusable; text disabled");
                    None
                }
            },
            None => FALLBACK_FONTS
                .iter()
                .map(PathBuf::from)
                .find_map(|path| load_font(&path).ok()),
        };
        if font.is_none() {
            tracing::warn!("No overlay font found; drawing indicators only");
        }
        Self {
            font,
            scale: clamp_scale(config.font_scale),
        }
    }

    /// An annotator that draws indicators but no text.
    pub fn without_text() -> Self {
        Self {
            font: None,
            scale: OverlayConfig::default().font_scale,
        }
    }

    /// Whether text rendering is available.
    pub fn has_text(&self) -> bool {
        self.font.is_some()
    }

    /// Draw the timestamp, mode line, and recording indicator.
    pub fn render_overlay(&self, frame: &mut GrayImage, status: &OverlayStatus) {
        let (w, h) = frame.dimensions();
        let line = self.scale.ceil() as u32 + 4;

        if self.font.is_some() {
            self.draw_label(frame, status.mode_text(), 4, 4);
            if let Some(badge) = status.badge.text() {
                self.draw_label(frame, &badge, 4, 4 + line as i32);
            }
            self.draw_label(frame, &status.timestamp, 4, h as i32 - line as i32 - 2);
        }

        if status.badge != RecordingBadge::Off {
            let radius = (line / 2).max(3) as i32;
            draw_filled_circle_mut(
                frame,
                (w as i32 - radius - 6, radius + 6),
                radius,
                Luma([255]),
            );
        }
    }

    /// White text on a black strip, top-left corner at `(x, y)`.
    fn draw_label(&self, frame: &mut GrayImage, text: &str, x: i32, y: i32) {
        let Some(font) = self.font.as_ref() else {
            return;
        };
        let scale = Scale::uniform(self.scale);
        let ascent = font.v_metrics(scale).ascent;
        let glyphs: Vec<_> = font.layout(text, scale, point(x as f32, y as f32 + ascent)).collect();

        let text_width = glyphs
            .iter()
            .filter_map(|g| g.pixel_bounding_box())
            .map(|bb| bb.max.x)
            .max()
            .unwrap_or(x)
            - x;
        if text_width > 0 {
            draw_filled_rect_mut(
                frame,
                Rect::at(x - 2, y - 1).of_size(text_width as u32 + 4, self.scale.ceil() as u32 + 2),
                Luma([0]),
            );
        }

        let (w, h) = frame.dimensions();
        for glyph in &glyphs {
            let Some(bb) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let px = gx as i32 + bb.min.x;
                let py = gy as i32 + bb.min.y;
                if px >= 0 && py >= 0 && (px as u32) < w && (py as u32) < h {
                    let pixel = frame.get_pixel_mut(px as u32, py as u32);
                    let old = pixel.0[0] as f32;
                    pixel.0[0] = (old + (255.0 - old) * coverage) as u8;
                }
            });
        }
    }
}

/// Read a TrueType font from disk.
pub fn load_font(path: &Path) -> CamcastResult<Font<'static>> {
    if !path.exists() {
        return Err(CamcastError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path)?;
    Font::try_from_vec(bytes)
        .ok_or_else(|| CamcastError::overlay(format!("Not a usable font: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(badge: RecordingBadge) -> OverlayStatus {
        OverlayStatus {
            timestamp: "2026-01-01 00:00:00".to_string(),
            face_detection: true,
            badge,
        }
    }

    #[test]
    fn test_badge_text() {
        assert_eq!(RecordingBadge::Off.text(), None);
        assert_eq!(
            RecordingBadge::Countdown { remaining_secs: 7 }.text().as_deref(),
            Some("RECORDING 7s")
        );
        assert_eq!(
            RecordingBadge::Manual.text().as_deref(),
            Some("RECORDING MANUAL")
        );
    }

    #[test]
    fn test_recording_indicator_drawn_without_font() {
        let annotator = Annotator::without_text();
        let mut frame = GrayImage::new(64, 48);
        annotator.render_overlay(&mut frame, &status(RecordingBadge::Manual));
        assert!(frame.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn test_idle_overlay_without_font_leaves_frame_untouched() {
        let annotator = Annotator::without_text();
        let mut frame = GrayImage::new(64, 48);
        annotator.render_overlay(&mut frame, &status(RecordingBadge::Off));
        assert!(frame.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_overlay_keeps_geometry() {
        let annotator = Annotator::new(&OverlayConfig::default());
        let mut frame = GrayImage::new(640, 480);
        annotator.render_overlay(&mut frame, &status(RecordingBadge::Countdown { remaining_secs: 3 }));
        assert_eq!(frame.dimensions(), (640, 480));
    }

    #[test]
    fn test_oversized_font_scale_is_clamped() {
        for scale in [1e30, f32::INFINITY, f32::NAN, -3.0] {
            let config = OverlayConfig {
                font_path: None,
                font_scale: scale,
            };
            let annotator = Annotator::new(&config);
            assert!(annotator.scale >= 1.0 && annotator.scale <= MAX_FONT_SCALE);

            let mut frame = GrayImage::new(64, 48);
            annotator.render_overlay(&mut frame, &status(RecordingBadge::Manual));
            assert_eq!(frame.dimensions(), (64, 48));
        }
    }

    #[test]
    fn test_load_font_missing_file() {
        let err = load_font(Path::new("/nonexistent/camcast.ttf")).unwrap_err();
        assert!(matches!(err, CamcastError::FileNotFound { .. }));
    }
}
